mod builtin;
pub(crate) mod custom;
mod registry;

pub use builtin::*;
pub use custom::*;
pub use registry::*;

use anyhow::{anyhow, Result};
use enum_dispatch::enum_dispatch;
use kube::core::ApiResource;
use serde_json::Value as JsonValue;

use crate::{
    kube::{KubeClientRequest, ObjectList},
    logger,
    resource::K8sResource,
};

/// Static description shared by every handler kind.
#[enum_dispatch]
pub trait KindHandlerCapability {
    fn kind(&self) -> &str;

    /// Empty for the core group.
    fn group(&self) -> &str;

    fn version(&self) -> &str;

    fn plural(&self) -> &str;

    fn is_namespaced(&self) -> bool;

    fn is_custom(&self) -> bool;

    fn api_version(&self) -> String {
        if self.group().is_empty() {
            self.version().to_string()
        } else {
            format!("{}/{}", self.group(), self.version())
        }
    }
}

#[enum_dispatch(KindHandlerCapability)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KindHandler {
    Builtin(BuiltinKindHandler),
    Custom(CustomKindHandler),
}

impl From<BuiltinKind> for KindHandler {
    fn from(kind: BuiltinKind) -> Self {
        Self::Builtin(BuiltinKindHandler::new(kind))
    }
}

pub fn group_version_url(group: &str, version: &str) -> String {
    if group.is_empty() {
        format!("api/{}", version)
    } else {
        format!("apis/{}/{}", group, version)
    }
}

pub fn collection_path(
    group: &str,
    version: &str,
    plural: &str,
    namespace: Option<&str>,
) -> String {
    match namespace {
        Some(ns) => format!(
            "{}/namespaces/{}/{}",
            group_version_url(group, version),
            ns,
            plural
        ),
        None => format!("{}/{}", group_version_url(group, version), plural),
    }
}

impl KindHandler {
    /// A CRD hint overrides the version the handler was registered with.
    fn effective_version(&self, crd_hint: Option<&K8sResource>) -> String {
        crd_hint
            .and_then(|crd| CrdInfo::try_from(crd).ok())
            .and_then(|info| info.default_version())
            .unwrap_or_else(|| self.version().to_string())
    }

    /// `apiVersion` of the objects listed with `crd_hint`.
    pub fn api_version_for(&self, crd_hint: Option<&K8sResource>) -> String {
        let version = self.effective_version(crd_hint);

        if self.group().is_empty() {
            version
        } else {
            format!("{}/{}", self.group(), version)
        }
    }

    /// `namespace` is ignored for cluster scoped kinds; `None` on a
    /// namespaced kind lists across all namespaces.
    pub fn collection_path(&self, namespace: Option<&str>) -> String {
        self.collection_path_for_version(self.version(), namespace)
    }

    fn collection_path_for_version(&self, version: &str, namespace: Option<&str>) -> String {
        let namespace = if self.is_namespaced() { namespace } else { None };

        collection_path(self.group(), version, self.plural(), namespace)
    }

    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group().to_string(),
            version: self.version().to_string(),
            api_version: self.api_version(),
            kind: self.kind().to_string(),
            plural: self.plural().to_string(),
        }
    }

    pub async fn list_in_cluster<C: KubeClientRequest>(
        &self,
        client: &C,
        namespace: Option<&str>,
        crd_hint: Option<&K8sResource>,
    ) -> Result<Vec<JsonValue>> {
        let version = self.effective_version(crd_hint);

        let path = self.collection_path_for_version(&version, namespace);

        logger!(debug, "Listing {} [{}]", self.kind(), path);

        let list: ObjectList = client.request(&path).await?;

        Ok(list.items)
    }

    fn object_name(object: &JsonValue) -> Result<&str> {
        object
            .pointer("/metadata/name")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| anyhow!("object has no metadata.name"))
    }

    fn namespaced_object(&self, object: &JsonValue, namespace: Option<&str>) -> JsonValue {
        let mut object = object.clone();

        if let (true, Some(ns), Some(metadata)) = (
            self.is_namespaced(),
            namespace,
            object.get_mut("metadata").and_then(JsonValue::as_object_mut),
        ) {
            metadata.insert("namespace".into(), JsonValue::String(ns.to_string()));
        }

        object
    }

    pub async fn apply_in_cluster<C: KubeClientRequest>(
        &self,
        client: &C,
        object: &JsonValue,
        namespace: Option<&str>,
    ) -> Result<JsonValue> {
        let object = self.namespaced_object(object, namespace);
        let name = Self::object_name(&object)?;
        let path = self.collection_path(namespace);

        logger!(info, "Applying {} {} [{}]", self.kind(), name, path);

        client.apply(&path, name, &object).await
    }

    pub async fn replace_in_cluster<C: KubeClientRequest>(
        &self,
        client: &C,
        object: &JsonValue,
        namespace: Option<&str>,
    ) -> Result<JsonValue> {
        let object = self.namespaced_object(object, namespace);
        let name = Self::object_name(&object)?;
        let path = self.collection_path(namespace);

        logger!(info, "Replacing {} {} [{}]", self.kind(), name, path);

        client.replace(&path, name, &object).await
    }

    pub async fn remove_in_cluster<C: KubeClientRequest>(
        &self,
        client: &C,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<()> {
        let path = self.collection_path(namespace);

        logger!(info, "Removing {} {} [{}]", self.kind(), name, path);

        client.delete(&path, name).await
    }
}
