mod apply;
mod ignored;
mod matcher;

pub use apply::*;
pub use ignored::*;
pub use matcher::*;

use anyhow::Result;
use similar::TextDiff;

use crate::{
    config::Settings,
    resource::{to_sorted_yaml, K8sResource},
};

const DIFF_CONTEXT_RADIUS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffOptions {
    pub hide_ignored_fields: bool,
    pub ignored_paths: Vec<String>,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            hide_ignored_fields: true,
            ignored_paths: DEFAULT_IGNORED_PATHS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl From<&Settings> for DiffOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            hide_ignored_fields: settings.hide_ignored_fields,
            ignored_paths: settings.ignored_paths.clone(),
        }
    }
}

impl DiffOptions {
    fn normalize(&self, resource: &K8sResource) -> Result<String> {
        if self.hide_ignored_fields {
            to_sorted_yaml(&strip_ignored_fields(&resource.object, &self.ignored_paths))
        } else {
            to_sorted_yaml(&resource.object)
        }
    }
}

/// Cluster object against its local counterpart, both rendered as YAML
/// with sorted keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDiff {
    pub cluster_id: String,
    pub local_id: String,
    pub cluster_yaml: String,
    pub local_yaml: String,
    pub are_resources_different: bool,
    pub unified: String,
}

impl ResourceDiff {
    pub fn compute(
        cluster: &K8sResource,
        local: &K8sResource,
        options: &DiffOptions,
    ) -> Result<Self> {
        let cluster_yaml = options.normalize(cluster)?;
        let local_yaml = options.normalize(local)?;

        let are_resources_different = cluster_yaml != local_yaml;

        let unified = if are_resources_different {
            TextDiff::from_lines(&cluster_yaml, &local_yaml)
                .unified_diff()
                .context_radius(DIFF_CONTEXT_RADIUS)
                .header("cluster", "local")
                .to_string()
        } else {
            String::new()
        };

        Ok(Self {
            cluster_id: cluster.id.clone(),
            local_id: local.id.clone(),
            cluster_yaml,
            local_yaml,
            are_resources_different,
            unified,
        })
    }

    /// The local manifest may be pushed to the cluster.
    pub fn can_apply(&self) -> bool {
        self.are_resources_different
    }

    /// The cluster object may overwrite the local manifest.
    pub fn can_replace(&self) -> bool {
        self.are_resources_different
    }
}

/// Diffs `cluster` against its best local match. `None` when nothing in
/// `locals` matches.
pub fn diff_against_local<'a, I>(
    cluster: &K8sResource,
    locals: I,
    options: &DiffOptions,
) -> Result<Option<(&'a K8sResource, ResourceDiff)>>
where
    I: IntoIterator<Item = &'a K8sResource>,
{
    let Some(local) = find_matching_local(cluster, locals) else {
        return Ok(None);
    };

    let diff = ResourceDiff::compute(cluster, local, options)?;

    Ok(Some((local, diff)))
}
