use std::{
    future::Future,
    path::PathBuf,
    sync::{Arc, Weak},
};

use crossbeam::channel::{unbounded, Receiver, Sender};
use tokio::{sync::Mutex, task::AbortHandle};

use crate::{
    cluster::{
        spawn_watchers, ClusterEvent, ClusterResourceLoader, LoadOptions, LoadOutcome,
        LoadRegistry, LoadToken, NamespaceSelection,
    },
    command::KubeContext,
    config::{Config, Settings},
    error::{ClusterErrorCode, ClusterLoadError, MonokleClusterError},
    handlers::KindHandlerRegistry,
    kube::{create_kube_client, ClientOptions, KubeClient, KubeClientRequest},
    logger,
};

use super::{KubectlProxy, PublishedView, ResourceStore};

const CLUSTER_LOAD_KEY: &str = "cluster";

#[derive(Debug, Clone, Default, PartialEq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error(MonokleClusterError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProxyState {
    pub port: Option<u16>,
}

#[derive(Debug)]
struct CachedProxy {
    context: String,
    proxy: KubectlProxy,
    generation: u64,
    monitor: AbortHandle,
}

impl CachedProxy {
    async fn stop(self) {
        logger!(info, "Stopping proxy [context={}]", self.context);

        self.monitor.abort();
        self.proxy.shutdown().await;
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: ConnectionState,
    context: Option<String>,
    namespace: NamespaceSelection,
    client: Option<KubeClient>,
    proxy: Option<CachedProxy>,
    proxy_generation: u64,
    watchers: Vec<AbortHandle>,
}

impl Inner {
    fn abort_watchers(&mut self) {
        for handle in self.watchers.drain(..) {
            handle.abort();
        }
    }

    fn proxy_port(&self) -> Option<u16> {
        self.proxy.as_ref().map(|cached| cached.proxy.port())
    }
}

/// State reachable from background tasks.
#[derive(Debug, Default)]
struct Shared {
    store: ResourceStore,
    loads: Mutex<LoadRegistry>,
    inner: Mutex<Inner>,
}

impl Shared {
    /// Stops everything and clears the published view.
    async fn teardown(&self, inner: &mut Inner, state: ConnectionState) {
        self.loads.lock().await.cancel_all();

        inner.abort_watchers();
        inner.client = None;

        if let Some(cached) = inner.proxy.take() {
            cached.stop().await;
        }

        inner.state = state;

        self.store.clear().await;
    }

    async fn fail(&self, err: MonokleClusterError) -> ClusterLoadError {
        logger!(error, "Cluster connection failed: {}", err);

        let mut inner = self.inner.lock().await;
        self.teardown(&mut inner, ConnectionState::Error(err.clone()))
            .await;

        err.into()
    }
}

/// Tears the connection down as soon as the proxy of `generation` exits
/// on its own.
fn monitor_proxy(
    shared: Weak<Shared>,
    generation: u64,
    exited: impl Future<Output = Option<MonokleClusterError>> + Send + 'static,
) -> AbortHandle {
    tokio::spawn(async move {
        let Some(err) = exited.await else {
            return;
        };

        let Some(shared) = shared.upgrade() else {
            return;
        };

        let mut inner = shared.inner.lock().await;

        if !inner
            .proxy
            .as_ref()
            .is_some_and(|cached| cached.generation == generation)
        {
            return;
        }

        logger!(error, "Proxy exited, dropping the cluster view: {}", err);

        // Removed before teardown, stopping it would abort this task.
        inner.proxy.take();

        shared
            .teardown(&mut inner, ConnectionState::Error(err))
            .await;
    })
    .abort_handle()
}

/// Connection to one cluster context at a time.
///
/// Every load takes a fresh token and cancels the one before it, so of
/// two overlapping loads only the newer publishes. A published load is
/// followed by watchers whose events arrive on [`ClusterConnection::events`].
pub struct ClusterConnection {
    settings: Settings,
    kubeconfig_paths: Vec<PathBuf>,
    registry: KindHandlerRegistry,
    events: Sender<ClusterEvent>,
    receiver: Receiver<ClusterEvent>,
    shared: Arc<Shared>,
}

impl ClusterConnection {
    pub fn new(
        settings: Settings,
        kubeconfig_paths: Vec<PathBuf>,
        registry: KindHandlerRegistry,
    ) -> Self {
        let (events, receiver) = unbounded();

        Self {
            settings,
            kubeconfig_paths,
            registry,
            events,
            receiver,
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn from_config(config: &Config, registry: KindHandlerRegistry) -> Self {
        Self::new(config.settings.clone(), config.kubeconfig_paths(), registry)
    }

    pub fn store(&self) -> ResourceStore {
        self.shared.store.clone()
    }

    pub fn registry(&self) -> &KindHandlerRegistry {
        &self.registry
    }

    /// Changes seen by the watchers of the current view. Consumers apply
    /// them to [`ClusterConnection::store`].
    pub fn events(&self) -> Receiver<ClusterEvent> {
        self.receiver.clone()
    }

    pub async fn state(&self) -> ConnectionState {
        self.shared.inner.lock().await.state.clone()
    }

    pub async fn proxy_state(&self) -> ProxyState {
        ProxyState {
            port: self.shared.inner.lock().await.proxy_port(),
        }
    }

    pub async fn client(&self) -> Option<KubeClient> {
        self.shared.inner.lock().await.client.clone()
    }

    pub async fn context(&self) -> Option<String> {
        self.shared.inner.lock().await.context.clone()
    }

    pub async fn watcher_count(&self) -> usize {
        self.shared.inner.lock().await.watchers.len()
    }

    pub fn kube_context(&self, context: &str, proxy_port: Option<u16>) -> KubeContext {
        KubeContext {
            context: Some(context.to_string()),
            kubeconfig: self.kubeconfig_paths.first().cloned(),
            proxy_port,
        }
    }

    pub async fn begin_load(&self) -> LoadToken {
        self.shared.loads.lock().await.begin(CLUSTER_LOAD_KEY)
    }

    fn adopt_proxy(&self, inner: &mut Inner, context: &str, proxy: KubectlProxy) -> u16 {
        inner.proxy_generation += 1;

        let generation = inner.proxy_generation;
        let port = proxy.port();
        let monitor = monitor_proxy(Arc::downgrade(&self.shared), generation, proxy.exited());

        inner.proxy = Some(CachedProxy {
            context: context.to_string(),
            proxy,
            generation,
            monitor,
        });

        port
    }

    /// Proxy port for `context`, starting a proxy unless one is already
    /// running for it.
    async fn ensure_proxy(
        &self,
        inner: &mut Inner,
        context: &str,
    ) -> Result<u16, MonokleClusterError> {
        if let Some(cached) = &inner.proxy {
            if cached.context == context {
                return match cached.proxy.check_exited() {
                    None => Ok(cached.proxy.port()),
                    Some(err) => Err(err),
                };
            }
        }

        if let Some(cached) = inner.proxy.take() {
            cached.stop().await;
        }

        let proxy = KubectlProxy::spawn(&self.kube_context(context, None)).await?;

        Ok(self.adopt_proxy(inner, context, proxy))
    }

    /// Selects `context` and loads it. Any running load is cancelled.
    pub async fn connect(
        &self,
        context: &str,
        namespace: NamespaceSelection,
    ) -> Result<LoadOutcome, ClusterLoadError> {
        let token = self.begin_load().await;

        let client = {
            let mut inner = self.shared.inner.lock().await;

            logger!(info, "Connecting [context={} namespace={}]", context, namespace);

            inner.abort_watchers();
            inner.state = ConnectionState::Connecting;
            inner.context = Some(context.to_string());
            inner.namespace = namespace.clone();

            let proxy_port = if self.settings.use_kubectl_proxy {
                match self.ensure_proxy(&mut inner, context).await {
                    Ok(port) => Some(port),
                    Err(err) => {
                        drop(inner);
                        return Err(self.shared.fail(err).await);
                    }
                }
            } else {
                None
            };

            let options = ClientOptions {
                kubeconfig_paths: self.kubeconfig_paths.clone(),
                context: Some(context.to_string()),
                proxy_port,
                skip_health_check: false,
            };

            match create_kube_client(&options).await {
                Ok(client) => {
                    inner.client = Some(client.clone());
                    client
                }
                Err(err) => {
                    drop(inner);
                    return Err(self.shared.fail(err).await);
                }
            }
        };

        self.run_load(&client, context, &namespace, token).await
    }

    /// Loads the current context again with the cached client.
    pub async fn reload(&self) -> Result<LoadOutcome, ClusterLoadError> {
        let token = self.begin_load().await;

        let (client, context, namespace) = {
            let mut inner = self.shared.inner.lock().await;

            let (Some(client), Some(context)) = (inner.client.clone(), inner.context.clone())
            else {
                return Err(MonokleClusterError::new(
                    ClusterErrorCode::LoadFailed,
                    "no cluster context is connected",
                )
                .into());
            };

            if let Some(err) = inner
                .proxy
                .as_ref()
                .and_then(|cached| cached.proxy.check_exited())
            {
                drop(inner);
                return Err(self.shared.fail(err).await);
            }

            inner.state = ConnectionState::Connecting;

            (client, context, inner.namespace.clone())
        };

        self.run_load(&client, &context, &namespace, token).await
    }

    /// Runs one load with `client` and publishes it unless `token` was
    /// superseded in the meantime. A published load restarts the watchers
    /// for its namespace selection.
    pub async fn run_load<C>(
        &self,
        client: &C,
        context: &str,
        namespace: &NamespaceSelection,
        token: LoadToken,
    ) -> Result<LoadOutcome, ClusterLoadError>
    where
        C: KubeClientRequest + Clone + 'static,
    {
        let loader =
            ClusterResourceLoader::new(client, &self.registry, LoadOptions::from(&self.settings));

        let result = loader.load(context, namespace, &token).await;

        let mut inner = self.shared.inner.lock().await;

        let result = result.and_then(|outcome| {
            token.check()?;
            Ok(outcome)
        });

        match &result {
            Ok(outcome) => {
                self.shared
                    .store
                    .publish(PublishedView::from(outcome))
                    .await;
                inner.state = ConnectionState::Connected;

                inner.abort_watchers();
                inner.watchers = spawn_watchers(
                    client,
                    &self.registry,
                    &outcome.custom_kinds,
                    namespace,
                    &self.settings.access_namespaces(context),
                    &self.events,
                );

                logger!(
                    info,
                    "Connected [context={} resources={} watchers={}]",
                    context,
                    outcome.resources.len(),
                    inner.watchers.len()
                );
            }
            Err(err) if err.is_cancelled() => {
                logger!(info, "Discarded superseded load [context={}]", context);
            }
            Err(err) => {
                let alert = err.alert();
                inner.state = ConnectionState::Error(MonokleClusterError::new(
                    ClusterErrorCode::LoadFailed,
                    alert.message,
                ));
                inner.abort_watchers();
                self.shared.store.clear().await;
            }
        }

        self.shared.loads.lock().await.finish(CLUSTER_LOAD_KEY, &token);

        result
    }

    pub async fn disconnect(&self) {
        let mut inner = self.shared.inner.lock().await;

        logger!(info, "Disconnecting [context={:?}]", inner.context);

        inner.context = None;
        self.shared
            .teardown(&mut inner, ConnectionState::Disconnected)
            .await;
    }
}

impl Drop for ClusterConnection {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.shared.inner.try_lock() {
            inner.abort_watchers();
        }
    }
}
