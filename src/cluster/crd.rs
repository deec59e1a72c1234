use anyhow::Result;

use crate::{
    handlers::{CrdInfo, KindHandlerCapability, KindHandlerRegistry, CRD_KIND},
    kube::{KubeClientRequest, ObjectList},
    logger,
    resource::{items_to_yaml, K8sResource, ResourceMap, ResourceOrigin, ResourceStorage},
};

use super::{settle_all, NamespaceSelection};

/// One list call for the objects of a CRD.
#[derive(Debug, Clone)]
struct CustomQuery<'a> {
    crd: &'a K8sResource,
    info: CrdInfo,
    namespace: Option<String>,
}

fn queries<'a>(
    crds: &'a [K8sResource],
    selection: &NamespaceSelection,
    allowed_namespaces: &[String],
) -> Vec<CustomQuery<'a>> {
    let mut queries = Vec::new();

    for crd in crds {
        let info = match CrdInfo::try_from(crd) {
            Ok(info) => info,
            Err(e) => {
                logger!(warn, "Skipped CRD {}: {}", crd.name, e);
                continue;
            }
        };

        if !selection.includes_scope(info.namespaced) {
            logger!(debug, "Skipped CRD {} outside of {}", crd.name, selection);
            continue;
        }

        let namespaces = if info.namespaced {
            selection.namespaces(allowed_namespaces)
        } else {
            vec![None]
        };

        for namespace in namespaces {
            queries.push(CustomQuery {
                crd,
                info: info.clone(),
                namespace,
            });
        }
    }

    queries
}

async fn list_custom<C: KubeClientRequest>(
    client: &C,
    registry: &KindHandlerRegistry,
    query: &CustomQuery<'_>,
) -> Result<String> {
    let namespace = query.namespace.as_deref();

    if let Some(handler) = registry.find(&query.info.kind) {
        let items = handler
            .list_in_cluster(client, namespace, Some(query.crd))
            .await?;

        return items_to_yaml(items, handler.kind(), &handler.api_version_for(Some(query.crd)));
    }

    let version = query.info.version_or_fallback();

    let path = query.info.collection_path(&version, namespace);

    logger!(debug, "Listing {} [{}]", query.info.kind, path);

    let list: ObjectList = client.request(&path).await?;

    items_to_yaml(
        list.items,
        &query.info.kind,
        &format!("{}/{}", query.info.group, version),
    )
}

/// Lists the objects of every CRD in `crds` and returns them as one map.
/// A CRD whose objects cannot be listed contributes nothing.
pub async fn resolve_custom_resources<C: KubeClientRequest>(
    client: &C,
    registry: &KindHandlerRegistry,
    crds: &[K8sResource],
    selection: &NamespaceSelection,
    allowed_namespaces: &[String],
    context: &str,
) -> ResourceMap {
    let queries = queries(crds, selection, allowed_namespaces);

    let settled = settle_all(queries.iter().map(|query| async move {
        list_custom(client, registry, query)
            .await
            .map_err(|e| (query, e))
    }))
    .await;

    for (query, e) in &settled.failed {
        logger!(
            warn,
            "Failed to list {} [namespace={:?}]: {}",
            query.info.kind,
            query.namespace,
            e
        );
    }

    let mut resources = ResourceMap::default();

    for yaml in settled.succeeded.iter().filter(|yaml| !yaml.is_empty()) {
        match ResourceMap::from_documents(
            yaml,
            ResourceStorage::Cluster,
            ResourceOrigin::Cluster {
                context: context.to_string(),
            },
        ) {
            Ok(map) => resources.merge(map),
            Err(e) => logger!(warn, "Failed to parse custom resources: {}", e),
        }
    }

    logger!(
        info,
        "Resolved {} custom resources from {} CRDs",
        resources.len(),
        crds.len()
    );

    resources
}

/// Lists CRDs only to drive custom resource resolution. Nothing returned
/// here is meant to be kept.
pub async fn discover_crds<C: KubeClientRequest>(
    client: &C,
    registry: &KindHandlerRegistry,
) -> Vec<K8sResource> {
    let Some(handler) = registry.find(CRD_KIND) else {
        return Vec::new();
    };

    let result = async {
        let items = handler.list_in_cluster(client, None, None).await?;
        let yaml = items_to_yaml(items, handler.kind(), &handler.api_version())?;
        ResourceMap::from_documents(&yaml, ResourceStorage::Transient, ResourceOrigin::Transient)
    }
    .await;

    match result {
        Ok(map) => map.into_iter().map(|(_, crd)| crd).collect(),
        Err(e) => {
            logger!(warn, "Failed to discover CRDs: {}", e);
            Vec::new()
        }
    }
}
