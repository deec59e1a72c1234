use serde_json::Value as JsonValue;

/// Fields the API server fills in. Keys that contain dots are written in
/// brackets.
pub const DEFAULT_IGNORED_PATHS: &[&str] = &[
    "metadata.managedFields",
    "metadata.resourceVersion",
    "metadata.uid",
    "metadata.generation",
    "metadata.creationTimestamp",
    "metadata.selfLink",
    r#"metadata.annotations["kubectl.kubernetes.io/last-applied-configuration"]"#,
    "status",
];

/// Splits `a.b["c.d"].e` into `["a", "b", "c.d", "e"]`.
pub fn parse_path(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
            }
            '[' => {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }

                let quote = chars.next_if(|c| *c == '"' || *c == '\'');

                for c in chars.by_ref() {
                    if Some(c) == quote {
                        continue;
                    }
                    if c == ']' {
                        break;
                    }
                    current.push(c);
                }

                segments.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }

    if !current.is_empty() {
        segments.push(current);
    }

    segments
}

/// Removes the field at `segments`. Arrays on the way are descended
/// element by element. Maps on the path that end up empty are dropped
/// as well, whether or not the field was there, so `annotations: {}` and
/// a missing `annotations` compare equal.
fn remove_path(value: &mut JsonValue, segments: &[String]) -> bool {
    let Some((head, rest)) = segments.split_first() else {
        return false;
    };

    match value {
        JsonValue::Object(map) => {
            if rest.is_empty() {
                return map.remove(head).is_some();
            }

            let Some(child) = map.get_mut(head) else {
                return false;
            };

            let removed = remove_path(child, rest);

            if child.as_object().is_some_and(|m| m.is_empty()) {
                map.remove(head);
                return true;
            }

            removed
        }
        JsonValue::Array(items) => items
            .iter_mut()
            .fold(false, |removed, item| remove_path(item, segments) || removed),
        _ => false,
    }
}

pub fn strip_ignored_fields<S: AsRef<str>>(value: &JsonValue, paths: &[S]) -> JsonValue {
    let mut value = value.clone();

    for path in paths {
        remove_path(&mut value, &parse_path(path.as_ref()));
    }

    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("status", vec!["status"])]
    #[case("metadata.managedFields", vec!["metadata", "managedFields"])]
    #[case(
        r#"metadata.annotations["kubectl.kubernetes.io/last-applied-configuration"]"#,
        vec!["metadata", "annotations", "kubectl.kubernetes.io/last-applied-configuration"]
    )]
    #[case("metadata.labels['app.kubernetes.io/name'].x", vec!["metadata", "labels", "app.kubernetes.io/name", "x"])]
    fn parses_paths(#[case] path: &str, #[case] expected: Vec<&str>) {
        assert_eq!(parse_path(path), expected);
    }

    #[test]
    fn strips_default_paths() {
        let object = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "settings",
                "uid": "1234",
                "resourceVersion": "42",
                "annotations": {
                    "kubectl.kubernetes.io/last-applied-configuration": "{}"
                },
                "managedFields": [{"manager": "kubectl"}]
            },
            "data": {"key": "value"},
            "status": {}
        });

        let stripped = strip_ignored_fields(&object, DEFAULT_IGNORED_PATHS);

        assert_eq!(
            stripped,
            json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": "settings"},
                "data": {"key": "value"}
            })
        );
    }

    #[test]
    fn keeps_other_annotations() {
        let object = json!({
            "metadata": {
                "annotations": {
                    "kubectl.kubernetes.io/last-applied-configuration": "{}",
                    "team": "web"
                }
            }
        });

        let stripped = strip_ignored_fields(&object, DEFAULT_IGNORED_PATHS);

        assert_eq!(stripped, json!({"metadata": {"annotations": {"team": "web"}}}));
    }

    #[test]
    fn empty_maps_on_ignored_paths_are_dropped() {
        let local = json!({"metadata": {"name": "settings", "annotations": {}}});
        let cluster = json!({
            "metadata": {
                "name": "settings",
                "annotations": {
                    "kubectl.kubernetes.io/last-applied-configuration": "{}"
                }
            }
        });

        assert_eq!(
            strip_ignored_fields(&local, DEFAULT_IGNORED_PATHS),
            strip_ignored_fields(&cluster, DEFAULT_IGNORED_PATHS)
        );
        assert_eq!(
            strip_ignored_fields(&local, DEFAULT_IGNORED_PATHS),
            json!({"metadata": {"name": "settings"}})
        );
    }

    #[test]
    fn empty_maps_elsewhere_are_kept() {
        let object = json!({"spec": {"volumes": [{"name": "cache", "emptyDir": {}}]}});

        assert_eq!(strip_ignored_fields(&object, DEFAULT_IGNORED_PATHS), object);
    }

    #[test]
    fn descends_into_arrays() {
        let object = json!({
            "spec": {"containers": [
                {"name": "a", "terminationMessagePath": "/dev/termination-log"},
                {"name": "b"}
            ]}
        });

        let stripped = strip_ignored_fields(&object, &["spec.containers.terminationMessagePath"]);

        assert_eq!(
            stripped,
            json!({"spec": {"containers": [{"name": "a"}, {"name": "b"}]}})
        );
    }
}
