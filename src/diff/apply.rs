use std::fs;

use anyhow::{anyhow, Context as _, Result};
use serde_json::Value as JsonValue;

use crate::{
    handlers::KindHandlerRegistry,
    kube::KubeClientRequest,
    logger,
    resource::{join_documents, parse_documents, K8sResource},
};

use super::{strip_ignored_fields, DiffOptions};

/// Pushes `local` to the cluster with server-side apply. `namespace`
/// overrides the namespace written in the manifest.
pub async fn apply_local_to_cluster<C: KubeClientRequest>(
    client: &C,
    registry: &KindHandlerRegistry,
    local: &K8sResource,
    namespace: Option<&str>,
) -> Result<JsonValue> {
    let handler = registry
        .find(&local.kind)
        .ok_or_else(|| anyhow!("no handler registered for kind {}", local.kind))?;

    let namespace = namespace.or(local.namespace.as_deref());

    handler.apply_in_cluster(client, &local.object, namespace).await
}

/// Replaces the cluster object with `local`. The `resourceVersion` of
/// `cluster` is carried over so a concurrent change makes the request fail.
pub async fn replace_local_in_cluster<C: KubeClientRequest>(
    client: &C,
    registry: &KindHandlerRegistry,
    local: &K8sResource,
    cluster: &K8sResource,
    namespace: Option<&str>,
) -> Result<JsonValue> {
    let handler = registry
        .find(&local.kind)
        .ok_or_else(|| anyhow!("no handler registered for kind {}", local.kind))?;

    let resource_version = cluster
        .object
        .pointer("/metadata/resourceVersion")
        .cloned()
        .ok_or_else(|| anyhow!("{} has no resourceVersion", cluster.identity()))?;

    let mut object = local.object.clone();

    match object
        .get_mut("metadata")
        .and_then(JsonValue::as_object_mut)
    {
        Some(metadata) => {
            metadata.insert("resourceVersion".into(), resource_version);
        }
        None => return Err(anyhow!("{} has no metadata", local.identity())),
    }

    let namespace = namespace
        .or(local.namespace.as_deref())
        .or(cluster.namespace.as_deref());

    handler.replace_in_cluster(client, &object, namespace).await
}

/// Returns `local` with its manifest taken from `cluster`. Server
/// populated fields are dropped, and so is the namespace when the local
/// manifest did not set one.
pub fn replace_local_with_cluster(
    local: &K8sResource,
    cluster: &K8sResource,
    options: &DiffOptions,
) -> Result<K8sResource> {
    let mut object = strip_ignored_fields(&cluster.object, &options.ignored_paths);

    if local.namespace.is_none() {
        if let Some(metadata) = object
            .get_mut("metadata")
            .and_then(JsonValue::as_object_mut)
        {
            metadata.remove("namespace");
        }
    }

    local.with_object(object)
}

fn same_document(document: &JsonValue, resource: &K8sResource) -> bool {
    let field = |pointer: &str| document.pointer(pointer).and_then(JsonValue::as_str);

    field("/kind") == Some(resource.kind.as_str())
        && field("/apiVersion") == Some(resource.api_version.as_str())
        && field("/metadata/name") == Some(resource.name.as_str())
        && field("/metadata/namespace") == resource.namespace.as_deref()
}

/// Writes `resource` back to the file it was loaded from. The document
/// with the same identity is replaced in place; when there is none the
/// resource is appended.
pub fn write_local_resource(resource: &K8sResource) -> Result<()> {
    let path = resource
        .file_path()
        .ok_or_else(|| anyhow!("{} was not loaded from a file", resource.identity()))?;

    let mut documents = if path.exists() {
        let text =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        parse_documents(&text)?
    } else {
        Vec::new()
    };

    match documents.iter_mut().find(|doc| same_document(doc, resource)) {
        Some(document) => *document = resource.object.clone(),
        None => documents.push(resource.object.clone()),
    }

    let rendered = documents
        .iter()
        .map(serde_yaml::to_string)
        .collect::<Result<Vec<_>, _>>()?;

    fs::write(path, join_documents(rendered))
        .with_context(|| format!("failed to write {}", path.display()))?;

    logger!(info, "Wrote {} to {}", resource.identity(), path.display());

    Ok(())
}
