use anyhow::Result;

use crate::{
    config::{access_namespaces, ClusterAccess, Settings},
    error::{Alert, AlertType, ClusterErrorCode, ClusterLoadError, MonokleClusterError},
    handlers::{CrdInfo, KindHandler, KindHandlerCapability, KindHandlerRegistry, CRD_KIND},
    kube::KubeClientRequest,
    logger,
    resource::{
        items_to_yaml, join_documents, process_refs, K8sResource, ResourceMap, ResourceOrigin,
        ResourceStorage,
    },
};

use super::{
    discover_crds, resolve_custom_resources, settle_all, LoadToken, NamespaceSelection, Settled,
};

pub const LOAD_FAILED_TITLE: &str = "Cluster Resources Failed";

pub const PARTIAL_LOAD_TITLE: &str = "Cluster Resources Partially Loaded";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOptions {
    pub cluster_access: Vec<ClusterAccess>,
    pub warn_on_partial_load: bool,
}

impl From<&Settings> for LoadOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            cluster_access: settings.cluster_access.clone(),
            warn_on_partial_load: settings.warn_on_partial_load,
        }
    }
}

impl LoadOptions {
    fn access_namespaces(&self, context: &str) -> Vec<String> {
        access_namespaces(&self.cluster_access, context)
    }
}

#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub context: String,
    pub namespace: NamespaceSelection,
    pub resources: ResourceMap,
    /// Only set for a degraded load when warnings are enabled.
    pub alert: Option<Alert>,
    pub failed_kinds: Vec<String>,
    /// CRDs whose objects were resolved, so their kinds can be watched.
    pub custom_kinds: Vec<CrdInfo>,
}

/// Items of one successful list call, already rendered as YAML.
#[derive(Debug)]
struct KindBatch {
    yaml: String,
}

#[derive(Debug)]
pub struct KindFailure {
    pub kind: String,
    pub namespace: Option<String>,
    pub error: anyhow::Error,
}

/// Loads a cluster view: every non-custom kind in parallel, then the
/// objects of the discovered CRDs.
pub struct ClusterResourceLoader<'a, C> {
    client: &'a C,
    registry: &'a KindHandlerRegistry,
    options: LoadOptions,
}

impl<'a, C: KubeClientRequest> ClusterResourceLoader<'a, C> {
    pub fn new(client: &'a C, registry: &'a KindHandlerRegistry, options: LoadOptions) -> Self {
        Self {
            client,
            registry,
            options,
        }
    }

    /// Handler/namespace pairs in the order they are issued.
    fn plan(
        &self,
        selection: &NamespaceSelection,
        namespaces: &[Option<String>],
    ) -> Vec<(&'a KindHandler, Option<String>)> {
        let registry: &'a KindHandlerRegistry = self.registry;

        registry
            .non_custom()
            .filter(|handler| selection.includes_scope(handler.is_namespaced()))
            .flat_map(|handler| {
                if handler.is_namespaced() {
                    namespaces
                        .iter()
                        .map(|ns| (handler, ns.clone()))
                        .collect::<Vec<_>>()
                } else {
                    vec![(handler, None)]
                }
            })
            .collect()
    }

    async fn list_kind(
        &self,
        handler: &KindHandler,
        namespace: Option<&str>,
    ) -> Result<KindBatch, KindFailure> {
        let result = async {
            let items = handler.list_in_cluster(self.client, namespace, None).await?;
            items_to_yaml(items, handler.kind(), &handler.api_version())
        }
        .await;

        result
            .map(|yaml| KindBatch { yaml })
            .map_err(|error| KindFailure {
                kind: handler.kind().to_string(),
                namespace: namespace.map(ToString::to_string),
                error,
            })
    }

    fn failure_alert(failed: &[KindFailure]) -> Alert {
        let message = match failed.first() {
            Some(failure) => failure.error.to_string(),
            None => "No resource kind could be listed".to_string(),
        };

        Alert::new(AlertType::Error, LOAD_FAILED_TITLE, message)
    }

    fn failed_kinds(failed: &[KindFailure]) -> Vec<String> {
        let mut kinds: Vec<String> = Vec::new();

        for failure in failed {
            if !kinds.contains(&failure.kind) {
                kinds.push(failure.kind.clone());
            }
        }

        kinds
    }

    fn partial_alert(&self, failed_kinds: &[String]) -> Option<Alert> {
        (self.options.warn_on_partial_load && !failed_kinds.is_empty()).then(|| {
            Alert::new(
                AlertType::Warning,
                PARTIAL_LOAD_TITLE,
                format!("Could not list: {}", failed_kinds.join(", ")),
            )
        })
    }

    pub async fn load(
        &self,
        context: &str,
        selection: &NamespaceSelection,
        token: &LoadToken,
    ) -> Result<LoadOutcome, ClusterLoadError> {
        token.check()?;

        let allowed = self.options.access_namespaces(context);
        let namespaces = selection.namespaces(&allowed);
        let plan = self.plan(selection, &namespaces);

        logger!(
            info,
            "Loading cluster resources [context={} namespace={} calls={}]",
            context,
            selection,
            plan.len()
        );

        let settled: Settled<KindBatch, KindFailure> = settle_all(plan.iter().map(
            |(handler, namespace)| async move {
                logger!(debug, "Listing {} [namespace={:?}]", handler.kind(), namespace);
                self.list_kind(handler, namespace.as_deref()).await
            },
        ))
        .await;

        token.check()?;

        for failure in &settled.failed {
            logger!(
                warn,
                "Failed to list {} [namespace={:?}]: {}",
                failure.kind,
                failure.namespace,
                failure.error
            );
        }

        if settled.is_total_failure() {
            logger!(error, "No resource kind could be listed [context={}]", context);
            return Err(ClusterLoadError::Failed(Self::failure_alert(&settled.failed)));
        }

        let stream = join_documents(settled.succeeded.iter().map(|batch| &batch.yaml));

        let mut resources = ResourceMap::from_documents(
            &stream,
            ResourceStorage::Cluster,
            ResourceOrigin::Cluster {
                context: context.to_string(),
            },
        )
        .map_err(|e| MonokleClusterError::from_error(ClusterErrorCode::LoadFailed, e))?;

        let crds: Vec<K8sResource> = if plan.iter().any(|(h, _)| h.kind() == CRD_KIND) {
            resources.crds().cloned().collect()
        } else {
            discover_crds(self.client, self.registry).await
        };

        token.check()?;

        let custom_kinds: Vec<CrdInfo> = crds
            .iter()
            .filter_map(|crd| CrdInfo::try_from(crd).ok())
            .collect();

        if !crds.is_empty() {
            let custom = resolve_custom_resources(
                self.client,
                self.registry,
                &crds,
                selection,
                &allowed,
                context,
            )
            .await;

            resources.merge(custom);
        }

        token.check()?;

        process_refs(&mut resources);

        let failed_kinds = Self::failed_kinds(&settled.failed);

        logger!(
            info,
            "Loaded {} cluster resources [context={} succeeded={} failed={}]",
            resources.len(),
            context,
            settled.succeeded.len(),
            settled.failed.len()
        );

        Ok(LoadOutcome {
            context: context.to_string(),
            namespace: selection.clone(),
            alert: self.partial_alert(&failed_kinds),
            resources,
            failed_kinds,
            custom_kinds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        handlers::{custom::tests::crd, BuiltinKind},
        kube::{mock::MockTestKubeClient, ObjectList},
    };
    use anyhow::bail;
    use mockall::predicate::{always, eq};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn registry() -> KindHandlerRegistry {
        KindHandlerRegistry::from_handlers([
            BuiltinKind::ConfigMap.into(),
            BuiltinKind::Deployment.into(),
            BuiltinKind::Namespace.into(),
            BuiltinKind::CustomResourceDefinition.into(),
        ])
    }

    fn config_map(name: &str, namespace: &str) -> serde_json::Value {
        json!({"metadata": {"name": name, "namespace": namespace, "uid": format!("cm-{namespace}-{name}")}})
    }

    fn crd_object() -> serde_json::Value {
        crd("Widget", "Namespaced", &[("v1beta1", true), ("v1", true)]).object
    }

    fn expect_success(client: &mut MockTestKubeClient) {
        client
            .expect_request::<ObjectList>()
            .with(eq("api/v1/configmaps"))
            .returning(|_| Ok(ObjectList::from(vec![config_map("settings", "default")])));
        client
            .expect_request::<ObjectList>()
            .with(eq("apis/apps/v1/deployments"))
            .returning(|_| bail!("deployments is forbidden"));
        client
            .expect_request::<ObjectList>()
            .with(eq("api/v1/namespaces"))
            .returning(|_| Ok(ObjectList::from(vec![json!({"metadata": {"name": "default", "uid": "ns-default"}})])));
        client
            .expect_request::<ObjectList>()
            .with(eq("apis/apiextensions.k8s.io/v1/customresourcedefinitions"))
            .returning(|_| Ok(ObjectList::from(vec![crd_object()])));
        client
            .expect_request::<ObjectList>()
            .with(eq("apis/example.com/v1/widgets"))
            .returning(|_| {
                Ok(ObjectList::from(vec![
                    json!({"metadata": {"name": "w-1", "namespace": "default", "uid": "w-1"}}),
                ]))
            });
    }

    #[tokio::test]
    async fn partial_failure_returns_the_succeeded_subset() {
        let mut client = MockTestKubeClient::new();
        expect_success(&mut client);

        let registry = registry();
        let loader = ClusterResourceLoader::new(&client, &registry, LoadOptions::default());

        let outcome = loader
            .load("dev", &NamespaceSelection::All, &LoadToken::new())
            .await
            .unwrap();

        let mut kinds: Vec<_> = outcome.resources.values().map(|r| r.kind.as_str()).collect();
        kinds.sort();

        assert_eq!(
            kinds,
            vec!["ConfigMap", "CustomResourceDefinition", "Namespace", "Widget"]
        );
        assert_eq!(outcome.failed_kinds, vec!["Deployment"]);
        assert_eq!(outcome.alert, None);
        assert_eq!(
            outcome
                .custom_kinds
                .iter()
                .map(|info| info.kind.as_str())
                .collect::<Vec<_>>(),
            vec!["Widget"]
        );

        let config_map = &outcome.resources["cm-default-settings"];
        assert_eq!(config_map.api_version, "v1");
        assert_eq!(config_map.kind, "ConfigMap");
        assert_eq!(outcome.resources["w-1"].api_version, "example.com/v1");
    }

    #[tokio::test]
    async fn partial_failure_warns_when_enabled() {
        let mut client = MockTestKubeClient::new();
        expect_success(&mut client);

        let registry = registry();
        let loader = ClusterResourceLoader::new(
            &client,
            &registry,
            LoadOptions {
                warn_on_partial_load: true,
                ..Default::default()
            },
        );

        let outcome = loader
            .load("dev", &NamespaceSelection::All, &LoadToken::new())
            .await
            .unwrap();

        assert_eq!(
            outcome.alert,
            Some(Alert::new(
                AlertType::Warning,
                PARTIAL_LOAD_TITLE,
                "Could not list: Deployment"
            ))
        );
    }

    #[tokio::test]
    async fn total_failure_is_rejected_with_an_alert() {
        let mut client = MockTestKubeClient::new();

        client
            .expect_request::<ObjectList>()
            .with(always())
            .returning(|_| bail!("connection refused"));

        let registry = registry();
        let loader = ClusterResourceLoader::new(&client, &registry, LoadOptions::default());

        let err = loader
            .load("dev", &NamespaceSelection::All, &LoadToken::new())
            .await
            .unwrap_err();

        assert_eq!(
            err.alert(),
            Alert::new(AlertType::Error, LOAD_FAILED_TITLE, "connection refused")
        );
    }

    #[tokio::test]
    async fn all_fans_out_over_configured_namespaces() {
        let mut client = MockTestKubeClient::new();

        client
            .expect_request::<ObjectList>()
            .with(eq("api/v1/namespaces/a/configmaps"))
            .times(1)
            .returning(|_| Ok(ObjectList::from(vec![config_map("x", "a")])));
        client
            .expect_request::<ObjectList>()
            .with(eq("api/v1/namespaces/b/configmaps"))
            .times(1)
            .returning(|_| Ok(ObjectList::from(vec![config_map("x", "b")])));
        client
            .expect_request::<ObjectList>()
            .with(eq("api/v1/namespaces"))
            .times(1)
            .returning(|_| Ok(ObjectList::default()));

        let registry = KindHandlerRegistry::from_handlers([
            BuiltinKind::ConfigMap.into(),
            BuiltinKind::Namespace.into(),
        ]);

        let options = LoadOptions {
            cluster_access: vec![
                ClusterAccess {
                    context: "dev".into(),
                    namespace: "a".into(),
                },
                ClusterAccess {
                    context: "dev".into(),
                    namespace: "b".into(),
                },
                ClusterAccess {
                    context: "dev".into(),
                    namespace: "a".into(),
                },
                ClusterAccess {
                    context: "prod".into(),
                    namespace: "c".into(),
                },
            ],
            ..Default::default()
        };

        let loader = ClusterResourceLoader::new(&client, &registry, options);

        let outcome = loader
            .load("dev", &NamespaceSelection::All, &LoadToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.resources.len(), 2);
    }

    #[tokio::test]
    async fn named_namespace_lists_only_namespaced_kinds() {
        let mut client = MockTestKubeClient::new();

        client
            .expect_request::<ObjectList>()
            .with(eq("api/v1/namespaces/prod/configmaps"))
            .returning(|_| Ok(ObjectList::from(vec![config_map("x", "prod")])));
        client
            .expect_request::<ObjectList>()
            .with(eq("apis/apps/v1/namespaces/prod/deployments"))
            .returning(|_| Ok(ObjectList::default()));
        // CRDs are only looked up to resolve custom resources
        client
            .expect_request::<ObjectList>()
            .with(eq("apis/apiextensions.k8s.io/v1/customresourcedefinitions"))
            .returning(|_| Ok(ObjectList::default()));

        let registry = registry();
        let loader = ClusterResourceLoader::new(&client, &registry, LoadOptions::default());

        let outcome = loader
            .load("dev", &NamespaceSelection::Named("prod".into()), &LoadToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.resources.summary().keys().collect::<Vec<_>>(), vec!["ConfigMap"]);
    }

    #[tokio::test]
    async fn not_namespaced_lists_only_cluster_scoped_kinds() {
        let mut client = MockTestKubeClient::new();

        client
            .expect_request::<ObjectList>()
            .with(eq("api/v1/namespaces"))
            .returning(|_| Ok(ObjectList::from(vec![json!({"metadata": {"name": "kube-system"}})])));
        client
            .expect_request::<ObjectList>()
            .with(eq("apis/apiextensions.k8s.io/v1/customresourcedefinitions"))
            .returning(|_| Ok(ObjectList::from(vec![crd_object()])));

        let registry = registry();
        let loader = ClusterResourceLoader::new(&client, &registry, LoadOptions::default());

        let outcome = loader
            .load("dev", &NamespaceSelection::NotNamespaced, &LoadToken::new())
            .await
            .unwrap();

        let mut kinds: Vec<_> = outcome.resources.summary().into_keys().collect();
        kinds.sort();

        assert_eq!(kinds, vec!["CustomResourceDefinition", "Namespace"]);
    }

    #[tokio::test]
    async fn cancelled_token_publishes_nothing() {
        let client = MockTestKubeClient::new();

        let registry = registry();
        let loader = ClusterResourceLoader::new(&client, &registry, LoadOptions::default());

        let token = LoadToken::new();
        token.cancel();

        let err = loader
            .load("dev", &NamespaceSelection::All, &token)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn reload_of_unchanged_cluster_is_structurally_equal() {
        let mut client = MockTestKubeClient::new();

        client
            .expect_request::<ObjectList>()
            .with(eq("api/v1/configmaps"))
            .returning(|_| {
                Ok(ObjectList::from(vec![
                    json!({"metadata": {"name": "a", "namespace": "default"}}),
                    json!({"metadata": {"name": "b", "namespace": "default"}}),
                ]))
            });

        let registry = KindHandlerRegistry::from_handlers([BuiltinKind::ConfigMap.into()]);
        let loader = ClusterResourceLoader::new(&client, &registry, LoadOptions::default());

        let first = loader
            .load("dev", &NamespaceSelection::All, &LoadToken::new())
            .await
            .unwrap();
        let second = loader
            .load("dev", &NamespaceSelection::All, &LoadToken::new())
            .await
            .unwrap();

        assert_ne!(
            first.resources.keys().collect::<Vec<_>>(),
            second.resources.keys().collect::<Vec<_>>()
        );
        assert_eq!(first.resources.identities(), second.resources.identities());
    }
}
