use std::sync::Arc;

use anyhow::Result;
use tokio::sync::RwLock;

use crate::{
    cluster::{apply_cluster_event, ClusterEvent, LoadOutcome, NamespaceSelection},
    resource::ResourceMap,
};

/// The cluster view readers see.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishedView {
    pub context: String,
    pub namespace: NamespaceSelection,
    pub resources: ResourceMap,
}

impl From<&LoadOutcome> for PublishedView {
    fn from(outcome: &LoadOutcome) -> Self {
        Self {
            context: outcome.context.clone(),
            namespace: outcome.namespace.clone(),
            resources: outcome.resources.clone(),
        }
    }
}

/// Shared holder of the published view. Writers always swap in a whole
/// map, so a reader never observes a half merged load.
#[derive(Debug, Clone, Default)]
pub struct ResourceStore {
    inner: Arc<RwLock<Option<PublishedView>>>,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish(&self, view: PublishedView) {
        *self.inner.write().await = Some(view);
    }

    pub async fn snapshot(&self) -> Option<PublishedView> {
        self.inner.read().await.clone()
    }

    pub async fn resources(&self) -> ResourceMap {
        self.inner
            .read()
            .await
            .as_ref()
            .map(|view| view.resources.clone())
            .unwrap_or_default()
    }

    /// Events arriving with nothing published are dropped.
    pub async fn apply_event(&self, event: ClusterEvent) -> Result<bool> {
        let mut inner = self.inner.write().await;

        let Some(view) = inner.as_mut() else {
            return Ok(false);
        };

        view.resources = apply_cluster_event(&view.resources, event, &view.context)?;

        Ok(true)
    }

    pub async fn clear(&self) {
        *self.inner.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{K8sResource, ResourceOrigin, ResourceStorage};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn view() -> PublishedView {
        let resource = K8sResource::from_object(
            json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "team-a", "uid": "uid-team-a"}}),
            ResourceStorage::Cluster,
            ResourceOrigin::Cluster {
                context: "dev".into(),
            },
        )
        .unwrap();

        PublishedView {
            context: "dev".into(),
            namespace: NamespaceSelection::All,
            resources: [resource].into_iter().collect(),
        }
    }

    #[tokio::test]
    async fn publish_replaces_the_view() {
        let store = ResourceStore::new();

        assert_eq!(store.snapshot().await, None);

        store.publish(view()).await;

        assert_eq!(store.snapshot().await, Some(view()));
        assert_eq!(store.resources().await.len(), 1);

        store.clear().await;

        assert!(store.resources().await.is_empty());
    }

    #[tokio::test]
    async fn events_update_the_published_map() {
        let store = ResourceStore::new();
        store.publish(view()).await;

        let applied = store
            .apply_event(ClusterEvent::Deleted(json!({
                "apiVersion": "v1",
                "kind": "Namespace",
                "metadata": {"name": "team-a", "uid": "uid-team-a"}
            })))
            .await
            .unwrap();

        assert!(applied);
        assert!(store.resources().await.is_empty());
    }

    #[tokio::test]
    async fn events_without_view_are_dropped() {
        let store = ResourceStore::new();

        let applied = store
            .apply_event(ClusterEvent::Applied(json!({
                "apiVersion": "v1",
                "kind": "Namespace",
                "metadata": {"name": "team-b"}
            })))
            .await
            .unwrap();

        assert!(!applied);
        assert_eq!(store.snapshot().await, None);
    }
}
