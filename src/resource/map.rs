use std::{
    collections::{BTreeMap, BTreeSet},
    ops::Deref,
};

use anyhow::Result;

use crate::logger;

use super::{
    join_documents, parse_documents, to_sorted_yaml, K8sResource, ResourceIdentity,
    ResourceOrigin, ResourceStorage,
};

/// Resources keyed by id. A map is built completely and then handed out
/// as a whole; nothing edits a published map in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceMap(BTreeMap<String, K8sResource>);

impl Deref for ResourceMap {
    type Target = BTreeMap<String, K8sResource>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromIterator<K8sResource> for ResourceMap {
    fn from_iter<T: IntoIterator<Item = K8sResource>>(iter: T) -> Self {
        let mut map = Self::default();
        for resource in iter {
            map.insert(resource);
        }
        map
    }
}

impl IntoIterator for ResourceMap {
    type Item = (String, K8sResource);
    type IntoIter = std::collections::btree_map::IntoIter<String, K8sResource>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl ResourceMap {
    /// Parses a multi-document stream. Documents that are not Kubernetes
    /// objects are skipped.
    pub fn from_documents(
        text: &str,
        storage: ResourceStorage,
        origin: ResourceOrigin,
    ) -> Result<Self> {
        let mut map = Self::default();

        for document in parse_documents(text)? {
            match K8sResource::from_object(document, storage, origin.clone()) {
                Ok(resource) => {
                    map.insert(resource);
                }
                Err(e) => {
                    logger!(debug, "Skipped document: {}", e);
                }
            }
        }

        Ok(map)
    }

    /// An entry with the same id is replaced and returned.
    pub fn insert(&mut self, resource: K8sResource) -> Option<K8sResource> {
        self.0.insert(resource.id.clone(), resource)
    }

    pub fn remove(&mut self, id: &str) -> Option<K8sResource> {
        self.0.remove(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut K8sResource> {
        self.0.get_mut(id)
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut K8sResource> {
        self.0.values_mut()
    }

    /// Merges `other` into `self`; ids present in both take `other`'s entry.
    pub fn merge(&mut self, other: ResourceMap) {
        self.0.extend(other.0);
    }

    pub fn crds(&self) -> impl Iterator<Item = &K8sResource> {
        self.values().filter(|r| r.is_crd())
    }

    /// Identity set used to compare loads regardless of generated ids.
    pub fn identities(&self) -> BTreeSet<ResourceIdentity> {
        self.values().map(K8sResource::identity).collect()
    }

    /// Number of resources per kind.
    pub fn summary(&self) -> BTreeMap<String, usize> {
        self.values().fold(BTreeMap::new(), |mut acc, r| {
            *acc.entry(r.kind.clone()).or_default() += 1;
            acc
        })
    }

    /// All objects as one stream with sorted keys, ordered by identity.
    pub fn to_yaml(&self) -> Result<String> {
        let mut resources: Vec<_> = self.values().collect();
        resources.sort_by_key(|r| r.identity());

        let documents = resources
            .into_iter()
            .map(|r| to_sorted_yaml(&r.object))
            .collect::<Result<Vec<_>>>()?;

        Ok(join_documents(documents))
    }
}
