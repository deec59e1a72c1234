use std::mem;

use anyhow::Result;
use async_trait::async_trait;
use crossbeam::channel::Sender;
use futures::StreamExt as _;
use kube::{api::DynamicObject, core::ApiResource, runtime::watcher::Event};
use serde_json::Value as JsonValue;
use tokio::task::AbortHandle;

use crate::{
    handlers::{CrdInfo, CustomKindHandler, KindHandler, KindHandlerCapability, KindHandlerRegistry},
    kube::KubeClientRequest,
    logger,
    resource::{
        backfill_type_meta, process_refs, K8sResource, ResourceMap, ResourceOrigin,
        ResourceStorage,
    },
    worker::AbortWorker,
};

use super::NamespaceSelection;

#[derive(Debug, Clone, PartialEq)]
pub enum ClusterEvent {
    Applied(JsonValue),
    Deleted(JsonValue),
    /// The watch listed `kind` again after losing track of it. `objects`
    /// is everything that exists now within `namespace`.
    Restarted {
        kind: String,
        namespace: Option<String>,
        objects: Vec<JsonValue>,
    },
}

/// Streams changes of one kind after the initial load. The first listing
/// is dropped since the loader already did that work; later listings
/// replace the kind wholesale.
#[derive(Clone)]
pub struct ResourceWatcher<C> {
    client: C,
    api_resource: ApiResource,
    namespace: Option<String>,
    tx: Sender<ClusterEvent>,
}

impl<C: KubeClientRequest> ResourceWatcher<C> {
    pub fn new(
        client: C,
        handler: &KindHandler,
        namespace: Option<String>,
        tx: Sender<ClusterEvent>,
    ) -> Self {
        Self {
            client,
            api_resource: handler.api_resource(),
            namespace: if handler.is_namespaced() {
                namespace
            } else {
                None
            },
            tx,
        }
    }

    fn to_json(&self, object: DynamicObject) -> Option<JsonValue> {
        match serde_json::to_value(object) {
            Ok(mut value) => {
                backfill_type_meta(
                    &mut value,
                    &self.api_resource.kind,
                    &self.api_resource.api_version,
                );
                Some(value)
            }
            Err(e) => {
                logger!(error, "Failed to serialize {}: {}", self.api_resource.kind, e);
                None
            }
        }
    }
}

#[async_trait]
impl<C> AbortWorker for ResourceWatcher<C>
where
    C: KubeClientRequest + Clone + 'static,
{
    async fn run(&self) {
        logger!(
            info,
            "Watching {} [namespace={:?}]",
            self.api_resource.kind,
            self.namespace
        );

        let mut stream = self.client.watch(&self.api_resource, self.namespace.clone());

        let mut initial = true;
        let mut relisted: Vec<JsonValue> = Vec::new();

        while let Some(event) = stream.next().await {
            let event = match event {
                Ok(Event::Apply(object)) => self.to_json(object).map(ClusterEvent::Applied),
                Ok(Event::Delete(object)) => self.to_json(object).map(ClusterEvent::Deleted),
                Ok(Event::Init) => {
                    relisted.clear();
                    None
                }
                Ok(Event::InitApply(object)) => {
                    if !initial {
                        relisted.extend(self.to_json(object));
                    }
                    None
                }
                Ok(Event::InitDone) if initial => {
                    initial = false;
                    None
                }
                Ok(Event::InitDone) => {
                    logger!(
                        info,
                        "Watch of {} listed again [objects={}]",
                        self.api_resource.kind,
                        relisted.len()
                    );

                    Some(ClusterEvent::Restarted {
                        kind: self.api_resource.kind.clone(),
                        namespace: self.namespace.clone(),
                        objects: mem::take(&mut relisted),
                    })
                }
                Err(e) => {
                    logger!(warn, "Watch of {} failed: {}", self.api_resource.kind, e);
                    None
                }
            };

            if let Some(event) = event {
                if self.tx.send(event).is_err() {
                    break;
                }
            }
        }
    }
}

/// Handlers to watch: every non-custom kind plus the kinds declared by
/// `custom_kinds`, each once.
fn watched_handlers(registry: &KindHandlerRegistry, custom_kinds: &[CrdInfo]) -> Vec<KindHandler> {
    let mut handlers: Vec<KindHandler> = registry.non_custom().cloned().collect();

    for info in custom_kinds {
        if handlers.iter().any(|h| h.kind() == info.kind) {
            continue;
        }

        let handler = registry
            .find(&info.kind)
            .cloned()
            .unwrap_or_else(|| CustomKindHandler::from_crd(info).into());

        handlers.push(handler);
    }

    handlers
}

/// Starts one watcher per kind and namespace covered by `selection`.
pub fn spawn_watchers<C>(
    client: &C,
    registry: &KindHandlerRegistry,
    custom_kinds: &[CrdInfo],
    selection: &NamespaceSelection,
    allowed_namespaces: &[String],
    tx: &Sender<ClusterEvent>,
) -> Vec<AbortHandle>
where
    C: KubeClientRequest + Clone + 'static,
{
    let namespaces = selection.namespaces(allowed_namespaces);

    watched_handlers(registry, custom_kinds)
        .iter()
        .filter(|handler| selection.includes_scope(handler.is_namespaced()))
        .flat_map(|handler| {
            let scopes = if handler.is_namespaced() {
                namespaces.clone()
            } else {
                vec![None]
            };

            scopes.into_iter().map(move |namespace| {
                ResourceWatcher::new(client.clone(), handler, namespace, tx.clone()).spawn()
            })
        })
        .collect()
}

fn cluster_resource(object: JsonValue, context: &str) -> Result<K8sResource> {
    K8sResource::from_object(
        object,
        ResourceStorage::Cluster,
        ResourceOrigin::Cluster {
            context: context.to_string(),
        },
    )
}

fn ids_with_identity(resources: &ResourceMap, resource: &K8sResource) -> Vec<String> {
    let identity = resource.identity();

    resources
        .values()
        .filter(|r| r.identity() == identity)
        .map(|r| r.id.clone())
        .collect()
}

/// Applies `event` to a copy of `resources`. Objects are matched by
/// identity, so an entry keyed by a generated id is still replaced.
pub fn apply_cluster_event(
    resources: &ResourceMap,
    event: ClusterEvent,
    context: &str,
) -> Result<ResourceMap> {
    let mut updated = resources.clone();

    let (stale, fresh): (Vec<String>, Vec<K8sResource>) = match event {
        ClusterEvent::Applied(object) => {
            let resource = cluster_resource(object, context)?;
            (ids_with_identity(&updated, &resource), vec![resource])
        }
        ClusterEvent::Deleted(object) => {
            let resource = cluster_resource(object, context)?;
            (ids_with_identity(&updated, &resource), Vec::new())
        }
        ClusterEvent::Restarted {
            kind,
            namespace,
            objects,
        } => {
            let fresh = objects
                .into_iter()
                .map(|object| cluster_resource(object, context))
                .collect::<Result<Vec<_>>>()?;

            let stale = updated
                .values()
                .filter(|r| {
                    r.kind == kind
                        && namespace
                            .as_deref()
                            .is_none_or(|ns| r.namespace.as_deref() == Some(ns))
                })
                .map(|r| r.id.clone())
                .collect();

            (stale, fresh)
        }
    };

    for id in stale {
        updated.remove(&id);
    }

    for resource in fresh {
        updated.insert(resource);
    }

    process_refs(&mut updated);

    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        handlers::{custom::tests::crd, BuiltinKind},
        kube::mock::MockTestKubeClient,
    };
    use crossbeam::channel::unbounded;
    use futures::stream;
    use kube::runtime::watcher;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn config_map_json(name: &str) -> JsonValue {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": name, "namespace": "default"}
        })
    }

    fn config_map(name: &str) -> DynamicObject {
        serde_json::from_value(config_map_json(name)).unwrap()
    }

    fn cluster_map() -> ResourceMap {
        [
            json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "a", "namespace": "default"}}),
            json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "b", "namespace": "default", "uid": "uid-b"}}),
        ]
        .into_iter()
        .map(|object| {
            K8sResource::from_object(
                object,
                ResourceStorage::Cluster,
                ResourceOrigin::Cluster {
                    context: "dev".into(),
                },
            )
            .unwrap()
        })
        .collect()
    }

    #[test]
    fn applied_event_replaces_the_entry_with_the_same_identity() {
        let map = cluster_map();

        let event = ClusterEvent::Applied(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "a", "namespace": "default", "uid": "uid-a"},
            "data": {"key": "value"}
        }));

        let updated = apply_cluster_event(&map, event, "dev").unwrap();

        assert_eq!(updated.len(), 2);
        assert_eq!(updated["uid-a"].object["data"]["key"], "value");
        assert_eq!(map.len(), 2);
        assert!(!map.contains_key("uid-a"));
    }

    #[test]
    fn applied_event_adds_new_objects() {
        let map = cluster_map();

        let event = ClusterEvent::Applied(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "c", "namespace": "default", "uid": "uid-c"}
        }));

        let updated = apply_cluster_event(&map, event, "dev").unwrap();

        assert_eq!(updated.len(), 3);
    }

    #[test]
    fn deleted_event_removes_the_entry() {
        let map = cluster_map();

        let event = ClusterEvent::Deleted(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "b", "namespace": "default", "uid": "uid-b"}
        }));

        let updated = apply_cluster_event(&map, event, "dev").unwrap();

        assert_eq!(updated.len(), 1);
        assert!(!updated.contains_key("uid-b"));
    }

    #[test]
    fn events_without_name_are_rejected() {
        let map = cluster_map();

        let event = ClusterEvent::Applied(json!({"apiVersion": "v1", "kind": "ConfigMap"}));

        assert!(apply_cluster_event(&map, event, "dev").is_err());
    }

    #[tokio::test]
    async fn watcher_skips_the_first_listing_and_reports_later_ones() {
        let mut client = MockTestKubeClient::new();

        client
            .expect_watch()
            .withf(|resource, namespace| {
                resource.kind == "ConfigMap" && namespace.as_deref() == Some("default")
            })
            .returning(|_, _| {
                let events: Vec<Result<Event<DynamicObject>, watcher::Error>> = vec![
                    Ok(Event::Init),
                    Ok(Event::InitApply(config_map("a"))),
                    Ok(Event::InitDone),
                    Ok(Event::Apply(config_map("b"))),
                    Ok(Event::Init),
                    Ok(Event::InitApply(config_map("b"))),
                    Ok(Event::InitDone),
                ];

                stream::iter(events).boxed()
            });

        let (tx, rx) = unbounded();

        let handler = KindHandler::from(BuiltinKind::ConfigMap);

        ResourceWatcher::new(client, &handler, Some("default".into()), tx)
            .run()
            .await;

        let events: Vec<ClusterEvent> = rx.try_iter().collect();

        assert_eq!(
            events,
            vec![
                ClusterEvent::Applied(config_map_json("b")),
                ClusterEvent::Restarted {
                    kind: "ConfigMap".into(),
                    namespace: Some("default".into()),
                    objects: vec![config_map_json("b")],
                },
            ]
        );
    }

    #[test]
    fn restarted_event_replaces_the_kind_within_its_namespace() {
        let mut map = cluster_map();

        for object in [
            json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "c", "namespace": "other", "uid": "uid-c"}}),
            json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "default", "uid": "uid-ns"}}),
        ] {
            map.insert(
                K8sResource::from_object(
                    object,
                    ResourceStorage::Cluster,
                    ResourceOrigin::Cluster {
                        context: "dev".into(),
                    },
                )
                .unwrap(),
            );
        }

        let event = ClusterEvent::Restarted {
            kind: "ConfigMap".into(),
            namespace: Some("default".into()),
            objects: vec![
                json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "b", "namespace": "default", "uid": "uid-b"}, "data": {"key": "new"}}),
                json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "d", "namespace": "default", "uid": "uid-d"}}),
            ],
        };

        let updated = apply_cluster_event(&map, event, "dev").unwrap();

        let mut names: Vec<(&str, &str)> = updated
            .values()
            .map(|r| (r.kind.as_str(), r.name.as_str()))
            .collect();
        names.sort();

        assert_eq!(
            names,
            vec![
                ("ConfigMap", "b"),
                ("ConfigMap", "c"),
                ("ConfigMap", "d"),
                ("Namespace", "default"),
            ]
        );
        assert_eq!(updated["uid-b"].object["data"]["key"], "new");
    }

    #[test]
    fn custom_kinds_are_watched_once() {
        let registry = KindHandlerRegistry::builtin();
        let info = CrdInfo::try_from(&crd("Widget", "Namespaced", &[("v1", true)])).unwrap();

        let handlers = watched_handlers(&registry, &[info.clone(), info]);

        assert_eq!(handlers.len(), registry.non_custom().count() + 1);
        assert_eq!(
            handlers.iter().filter(|h| h.kind() == "Widget").count(),
            1
        );
        assert!(handlers.iter().any(|h| h.is_custom()));
    }
}
