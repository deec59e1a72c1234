use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::{cluster::default_crd_version, resource::K8sResource};

use super::{collection_path, KindHandlerCapability};

pub const CRD_KIND: &str = "CustomResourceDefinition";

/// Version used when a CRD does not declare any served version.
pub const FALLBACK_CRD_VERSION: &str = "v1";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CrdObject {
    spec: CrdSpec,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CrdSpec {
    group: String,
    names: CrdNames,
    #[serde(default)]
    scope: String,
    #[serde(default)]
    versions: Vec<CrdVersion>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CrdNames {
    kind: String,
    plural: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CrdVersion {
    name: String,
    #[serde(default = "default_served")]
    served: bool,
}

fn default_served() -> bool {
    true
}

/// The parts of a CustomResourceDefinition needed to query its objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrdInfo {
    pub name: String,
    pub group: String,
    pub kind: String,
    pub plural: String,
    pub namespaced: bool,
    pub versions: Vec<String>,
}

impl CrdInfo {
    /// `None` when the CRD lists no served version.
    pub fn default_version(&self) -> Option<String> {
        default_crd_version(&self.versions)
    }

    pub fn version_or_fallback(&self) -> String {
        self.default_version()
            .unwrap_or_else(|| FALLBACK_CRD_VERSION.to_string())
    }

    pub fn collection_path(&self, version: &str, namespace: Option<&str>) -> String {
        let namespace = if self.namespaced { namespace } else { None };

        collection_path(&self.group, version, &self.plural, namespace)
    }
}

impl TryFrom<&K8sResource> for CrdInfo {
    type Error = anyhow::Error;

    fn try_from(resource: &K8sResource) -> Result<Self> {
        if resource.kind != CRD_KIND {
            return Err(anyhow!(
                "{} {} is not a {}",
                resource.kind,
                resource.name,
                CRD_KIND
            ));
        }

        let crd: CrdObject = serde_json::from_value(resource.object.clone())?;

        Ok(Self {
            name: resource.name.clone(),
            group: crd.spec.group,
            kind: crd.spec.names.kind,
            plural: crd.spec.names.plural,
            namespaced: crd.spec.scope == "Namespaced",
            versions: crd
                .spec
                .versions
                .into_iter()
                .filter(|v| v.served)
                .map(|v| v.name)
                .collect(),
        })
    }
}

/// Handler registered from a CRD the user pointed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomKindHandler {
    kind: String,
    group: String,
    version: String,
    plural: String,
    namespaced: bool,
}

impl CustomKindHandler {
    pub fn from_crd(info: &CrdInfo) -> Self {
        Self {
            kind: info.kind.clone(),
            group: info.group.clone(),
            version: info.version_or_fallback(),
            plural: info.plural.clone(),
            namespaced: info.namespaced,
        }
    }
}

impl KindHandlerCapability for CustomKindHandler {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn group(&self) -> &str {
        &self.group
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn plural(&self) -> &str {
        &self.plural
    }

    fn is_namespaced(&self) -> bool {
        self.namespaced
    }

    fn is_custom(&self) -> bool {
        true
    }
}
