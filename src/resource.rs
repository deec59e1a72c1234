mod local;
mod map;
mod refs;
mod yaml;

pub use local::*;
pub use map::*;
pub use refs::*;
pub use yaml::*;

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use strum::Display;

use crate::handlers::CRD_KIND;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ResourceStorage {
    Local,
    Cluster,
    Transient,
    Preview,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ResourceOrigin {
    File { path: PathBuf },
    Cluster { context: String },
    Transient,
    Preview { source: String },
}

/// Everything that identifies an object independently of where it was
/// loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceIdentity {
    pub kind: String,
    pub api_version: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl std::fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{} ({})", self.kind, ns, self.name, self.api_version),
            None => write!(f, "{} {} ({})", self.kind, self.name, self.api_version),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct K8sResource {
    pub id: String,
    pub kind: String,
    pub api_version: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub object: JsonValue,
    pub storage: ResourceStorage,
    pub origin: ResourceOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refs: Option<Vec<ResourceRef>>,
}

fn str_field<'a>(object: &'a JsonValue, pointer: &str) -> Option<&'a str> {
    object.pointer(pointer).and_then(JsonValue::as_str)
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl K8sResource {
    /// Fails when the object lacks `kind`, `apiVersion` or `metadata.name`.
    pub fn from_object(
        object: JsonValue,
        storage: ResourceStorage,
        origin: ResourceOrigin,
    ) -> Result<Self> {
        let kind = str_field(&object, "/kind")
            .ok_or_else(|| anyhow!("object has no kind"))?
            .to_string();

        let api_version = str_field(&object, "/apiVersion")
            .ok_or_else(|| anyhow!("{} has no apiVersion", kind))?
            .to_string();

        let name = str_field(&object, "/metadata/name")
            .ok_or_else(|| anyhow!("{} has no metadata.name", kind))?
            .to_string();

        let namespace = str_field(&object, "/metadata/namespace").map(ToString::to_string);

        let id = match (storage, str_field(&object, "/metadata/uid")) {
            (ResourceStorage::Cluster, Some(uid)) => uid.to_string(),
            _ => new_id(),
        };

        Ok(Self {
            id,
            kind,
            api_version,
            name,
            namespace,
            object,
            storage,
            origin,
            refs: None,
        })
    }

    pub fn identity(&self) -> ResourceIdentity {
        ResourceIdentity {
            kind: self.kind.clone(),
            api_version: self.api_version.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    pub fn is_crd(&self) -> bool {
        self.kind == CRD_KIND
    }

    pub fn file_path(&self) -> Option<&Path> {
        match &self.origin {
            ResourceOrigin::File { path } => Some(path),
            _ => None,
        }
    }

    /// Replaces the manifest while keeping id, storage and origin.
    pub fn with_object(&self, object: JsonValue) -> Result<Self> {
        let mut updated = Self::from_object(object, self.storage, self.origin.clone())?;
        updated.id = self.id.clone();
        Ok(updated)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.object)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn cluster_origin() -> ResourceOrigin {
        ResourceOrigin::Cluster {
            context: "kind-dev".into(),
        }
    }

    #[test]
    fn cluster_resources_are_keyed_by_uid() {
        let object = json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "pod-1", "namespace": "default", "uid": "1234"}
        });

        let resource =
            K8sResource::from_object(object, ResourceStorage::Cluster, cluster_origin()).unwrap();

        assert_eq!(resource.id, "1234");
        assert_eq!(resource.namespace.as_deref(), Some("default"));
        assert_eq!(resource.identity().to_string(), "Pod default/pod-1 (v1)");
    }

    #[test]
    fn local_resources_never_reuse_uid() {
        let object = json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "pod-1", "uid": "1234"}
        });

        let a = K8sResource::from_object(
            object.clone(),
            ResourceStorage::Local,
            ResourceOrigin::File {
                path: "pod.yaml".into(),
            },
        )
        .unwrap();
        let b = K8sResource::from_object(object, ResourceStorage::Transient, ResourceOrigin::Transient)
            .unwrap();

        assert_ne!(a.id, "1234");
        assert_ne!(a.id, b.id);
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn objects_without_name_are_rejected() {
        let object = json!({"apiVersion": "v1", "kind": "Pod", "metadata": {}});

        let err =
            K8sResource::from_object(object, ResourceStorage::Cluster, cluster_origin()).unwrap_err();

        assert_eq!(err.to_string(), "Pod has no metadata.name");
    }

    #[test]
    fn with_object_keeps_id() {
        let resource = K8sResource::from_object(
            json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "a"}}),
            ResourceStorage::Local,
            ResourceOrigin::Transient,
        )
        .unwrap();

        let updated = resource
            .with_object(json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": "a", "namespace": "prod"},
                "data": {"key": "value"}
            }))
            .unwrap();

        assert_eq!(updated.id, resource.id);
        assert_eq!(updated.namespace.as_deref(), Some("prod"));
    }
}
