use std::path::PathBuf;

use anyhow::Result;
use http::Uri;
use kube::{
    config::{AuthInfo, KubeConfigOptions},
    Client, Config,
};

use crate::{
    error::{ClusterErrorCode, MonokleClusterError},
    logger,
};

use super::{read_kubeconfig, resolve_context, KubeClient};

pub const PROXY_HOST: &str = "127.0.0.1";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub kubeconfig_paths: Vec<PathBuf>,
    pub context: Option<String>,
    pub proxy_port: Option<u16>,
    pub skip_health_check: bool,
}

pub fn proxy_url(port: u16) -> String {
    format!("http://{}:{}", PROXY_HOST, port)
}

/// Sends every request through a local `kubectl proxy`. The proxy carries
/// the credentials, so TLS and auth material of the context are dropped.
pub fn route_through_proxy(config: &mut Config, port: u16) -> Result<()> {
    config.cluster_url = proxy_url(port).parse::<Uri>()?;
    config.root_cert = None;
    config.tls_server_name = None;
    config.proxy_url = None;
    config.auth_info = AuthInfo::default();

    Ok(())
}

/// Builds a kube config for `options` without touching the network.
pub async fn build_config(options: &ClientOptions) -> Result<Config, MonokleClusterError> {
    let kubeconfig = read_kubeconfig(&options.kubeconfig_paths)
        .map_err(|e| MonokleClusterError::from_error(ClusterErrorCode::KubeconfigNotFound, e))?;

    let context = resolve_context(&kubeconfig, options.context.as_deref())
        .map_err(|e| MonokleClusterError::from_error(ClusterErrorCode::ContextNotFound, e))?
        .name
        .to_string();

    let kubeconfig_options = KubeConfigOptions {
        context: Some(context.clone()),
        ..Default::default()
    };

    let mut config = Config::from_custom_kubeconfig(kubeconfig, &kubeconfig_options)
        .await
        .map_err(|e| MonokleClusterError::from_error(ClusterErrorCode::ClientSetupFailed, e))?;

    if let Some(port) = options.proxy_port {
        route_through_proxy(&mut config, port)
            .map_err(|e| MonokleClusterError::from_error(ClusterErrorCode::ClientSetupFailed, e))?;
    }

    logger!(
        info,
        "kube config ready [context={} cluster_url={}]",
        context,
        config.cluster_url
    );

    Ok(config)
}

pub async fn create_kube_client(options: &ClientOptions) -> Result<KubeClient, MonokleClusterError> {
    let config = build_config(options).await?;

    let server_url = config.cluster_url.to_string();

    let client = Client::try_from(config)
        .map_err(|e| MonokleClusterError::from_error(ClusterErrorCode::ClientSetupFailed, e))?;

    if !options.skip_health_check {
        let version = client.apiserver_version().await.map_err(|e| {
            logger!(error, "health check failed [server={}]: {}", server_url, e);
            MonokleClusterError::from_error(ClusterErrorCode::HealthCheckFailed, e)
        })?;

        logger!(info, "connected to {} ({})", server_url, version.git_version);
    }

    Ok(KubeClient::new(client, server_url))
}
