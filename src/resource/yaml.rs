use anyhow::Result;
use serde::Deserialize as _;
use serde_json::{Map, Value as JsonValue};

pub const DOCUMENT_SEPARATOR: &str = "---\n";

/// Sets `kind` and `apiVersion` on objects that came without them, as
/// items of a list response usually do.
pub fn backfill_type_meta(object: &mut JsonValue, kind: &str, api_version: &str) {
    if let Some(map) = object.as_object_mut() {
        if !map.get("kind").is_some_and(JsonValue::is_string) {
            map.insert("kind".into(), JsonValue::String(kind.into()));
        }

        if !map.get("apiVersion").is_some_and(JsonValue::is_string) {
            map.insert("apiVersion".into(), JsonValue::String(api_version.into()));
        }
    }
}

/// Renders the items of one list call as a multi-document stream.
pub fn items_to_yaml(items: Vec<JsonValue>, kind: &str, api_version: &str) -> Result<String> {
    let documents = items
        .into_iter()
        .map(|mut item| {
            backfill_type_meta(&mut item, kind, api_version);
            serde_yaml::to_string(&item)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(join_documents(documents))
}

pub fn join_documents<I, S>(documents: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    documents
        .into_iter()
        .filter(|doc| !doc.as_ref().trim().is_empty())
        .map(|doc| {
            let doc = doc.as_ref();
            if doc.ends_with('\n') {
                doc.to_string()
            } else {
                format!("{}\n", doc)
            }
        })
        .collect::<Vec<_>>()
        .join(DOCUMENT_SEPARATOR)
}

/// Empty and `null` documents are dropped.
pub fn parse_documents(text: &str) -> Result<Vec<JsonValue>> {
    let mut documents = Vec::new();

    for document in serde_yaml::Deserializer::from_str(text) {
        let value = JsonValue::deserialize(document)?;

        if !value.is_null() {
            documents.push(value);
        }
    }

    Ok(documents)
}

pub fn sort_keys(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));

            let sorted: Map<String, JsonValue> = entries
                .into_iter()
                .map(|(k, v)| (k.clone(), sort_keys(v)))
                .collect();

            JsonValue::Object(sorted)
        }
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(sort_keys).collect()),
        _ => value.clone(),
    }
}

pub fn to_sorted_yaml(value: &JsonValue) -> Result<String> {
    Ok(serde_yaml::to_string(&sort_keys(value))?)
}
