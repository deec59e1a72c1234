use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};

use crate::{
    cluster::{
        default_crd_version, discover_crds, ClusterEvent, LoadOutcome, NamespaceSelection,
    },
    config::Config,
    connection::{ClusterConnection, KubectlProxy},
    diff::{apply_local_to_cluster, diff_against_local, replace_local_in_cluster, DiffOptions},
    handlers::{CustomKindHandler, KindHandlerRegistry},
    kube::{read_kubeconfig, resolve_context},
    resource::{load_local_resources, K8sResource, ResourceMap, ScanFilter},
    signal::interrupt_channel,
};

use super::Command;

const FALLBACK_VERSION_NOTE: &str = "v1 (no version given, using fallback)";

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Summary,
    Yaml,
}

#[derive(Parser, Debug, Clone)]
pub enum SubCommand {
    /// Load cluster resources
    Load {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Summary)]
        output: OutputFormat,
    },

    /// Diff a cluster resource against its local manifest
    Diff { kind: String, name: String },

    /// Apply the local manifest of a resource to the cluster
    Apply {
        kind: String,
        name: String,

        /// Replace the cluster object instead of server-side apply
        #[arg(long)]
        replace: bool,
    },

    /// Start `kubectl proxy` and wait for Ctrl-C
    Proxy,

    /// Load, then stream changes until Ctrl-C
    Watch,

    /// Print the default version picked for CRD versions
    Versions {
        #[arg(required = true)]
        versions: Vec<String>,
    },
}

impl SubCommand {
    pub fn run(self, cmd: &Command, config: Config) -> Result<()> {
        if let SubCommand::Versions { versions } = &self {
            println!("{}", describe_default_version(versions));
            return Ok(());
        }

        let rt = tokio::runtime::Runtime::new()?;

        rt.block_on(async {
            let context = context_name(&config)?;

            match self {
                SubCommand::Load { output } => load(cmd, &config, &context, output).await,
                SubCommand::Diff { kind, name } => {
                    diff(cmd, &config, &context, &kind, &name).await
                }
                SubCommand::Apply {
                    kind,
                    name,
                    replace: false,
                } => apply(cmd, &config, &context, &kind, &name).await,
                SubCommand::Apply {
                    kind,
                    name,
                    replace: true,
                } => replace(cmd, &config, &context, &kind, &name).await,
                SubCommand::Proxy => proxy(&config, &context).await,
                SubCommand::Watch => watch(cmd, &config, &context).await,
                SubCommand::Versions { .. } => Ok(()),
            }
        })
    }
}

fn describe_default_version(versions: &[String]) -> String {
    default_crd_version(versions).unwrap_or_else(|| FALLBACK_VERSION_NOTE.to_string())
}

fn context_name(config: &Config) -> Result<String> {
    let kubeconfig = read_kubeconfig(&config.kubeconfig_paths())?;

    let context = resolve_context(&kubeconfig, config.settings.current_context.as_deref())?;

    Ok(context.name.to_string())
}

fn print_outcome(outcome: &LoadOutcome, output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Summary => {
            println!(
                "{} resources loaded from {} [{}]",
                outcome.resources.len(),
                outcome.context,
                outcome.namespace
            );

            for (kind, count) in outcome.resources.summary() {
                println!("  {:<32} {}", kind, count);
            }
        }
        OutputFormat::Yaml => print!("{}", outcome.resources.to_yaml()?),
    }

    if let Some(alert) = &outcome.alert {
        eprintln!("{}", alert);
    }

    Ok(())
}

async fn connect(
    cmd: &Command,
    config: &Config,
    context: &str,
) -> Result<(ClusterConnection, LoadOutcome)> {
    let connection = ClusterConnection::from_config(config, KindHandlerRegistry::builtin());

    let outcome = connection
        .connect(context, cmd.namespace_selection())
        .await
        .map_err(|e| anyhow!(e.alert().to_string()))?;

    Ok((connection, outcome))
}

fn local_resources(cmd: &Command, config: &Config) -> Result<ResourceMap> {
    let filter = ScanFilter::new(&config.settings.file_includes, &config.settings.scan_excludes)?;

    load_local_resources(&cmd.project_root()?, &filter)
}

/// Resources of `kind` named `name`, narrowed to the selected namespace
/// when one is given.
fn find_named<'a>(
    resources: impl IntoIterator<Item = &'a K8sResource>,
    cmd: &Command,
    kind: &str,
    name: &str,
) -> Option<&'a K8sResource> {
    let namespace = cmd.namespace_selection();

    resources.into_iter().find(|r| {
        r.kind == kind
            && r.name == name
            && namespace
                .as_namespace()
                .is_none_or(|ns| r.namespace.as_deref() == Some(ns))
    })
}

async fn load(cmd: &Command, config: &Config, context: &str, output: OutputFormat) -> Result<()> {
    let (connection, outcome) = connect(cmd, config, context).await?;

    print_outcome(&outcome, output)?;

    connection.disconnect().await;

    Ok(())
}

async fn diff(
    cmd: &Command,
    config: &Config,
    context: &str,
    kind: &str,
    name: &str,
) -> Result<()> {
    let (connection, outcome) = connect(cmd, config, context).await?;

    connection.disconnect().await;

    let target = find_named(outcome.resources.values(), cmd, kind, name)
        .ok_or_else(|| anyhow!("{} {} was not found in {}", kind, name, context))?;

    let locals = local_resources(cmd, config)?;

    let options = DiffOptions::from(&config.settings);

    match diff_against_local(target, locals.values(), &options)? {
        Some((local, diff)) if diff.are_resources_different => {
            if let Some(path) = local.file_path() {
                println!("# {}", path.display());
            }
            print!("{}", diff.unified);
        }
        Some(_) => println!("No differences"),
        None => println!("No local manifest matches {}", target.identity()),
    }

    Ok(())
}

async fn apply(
    cmd: &Command,
    config: &Config,
    context: &str,
    kind: &str,
    name: &str,
) -> Result<()> {
    let locals = local_resources(cmd, config)?;

    let local = find_named(locals.values(), cmd, kind, name)
        .ok_or_else(|| anyhow!("no local manifest for {} {}", kind, name))?;

    let connection = ClusterConnection::from_config(config, KindHandlerRegistry::builtin());

    connection
        .connect(context, NamespaceSelection::NotNamespaced)
        .await
        .map_err(|e| anyhow!(e.alert().to_string()))?;

    let client = connection
        .client()
        .await
        .ok_or_else(|| anyhow!("cluster {} is not connected", context))?;

    let mut registry = KindHandlerRegistry::builtin();

    if registry.find(&local.kind).is_none() {
        for crd in discover_crds(&client, &registry).await {
            if let Err(e) = registry.register_crd(&crd) {
                eprintln!("Skipped CRD {}: {}", crd.name, e);
            }
        }
    }

    let namespace = cmd.namespace_selection();

    let applied = apply_local_to_cluster(&client, &registry, local, namespace.as_namespace()).await;

    connection.disconnect().await;

    let applied = applied?;

    println!(
        "Applied {} {} (resourceVersion {})",
        local.kind,
        local.name,
        applied
            .pointer("/metadata/resourceVersion")
            .and_then(|v| v.as_str())
            .unwrap_or("-")
    );

    Ok(())
}

async fn replace(
    cmd: &Command,
    config: &Config,
    context: &str,
    kind: &str,
    name: &str,
) -> Result<()> {
    let locals = local_resources(cmd, config)?;

    let local = find_named(locals.values(), cmd, kind, name)
        .ok_or_else(|| anyhow!("no local manifest for {} {}", kind, name))?;

    let (connection, outcome) = connect(cmd, config, context).await?;

    let Some(cluster) = find_named(outcome.resources.values(), cmd, kind, name) else {
        connection.disconnect().await;
        return Err(anyhow!("{} {} is not in cluster {}", kind, name, context));
    };

    let client = connection
        .client()
        .await
        .ok_or_else(|| anyhow!("cluster {} is not connected", context))?;

    let mut registry = KindHandlerRegistry::builtin();

    if registry.find(&local.kind).is_none() {
        if let Some(info) = outcome.custom_kinds.iter().find(|c| c.kind == local.kind) {
            registry.register(CustomKindHandler::from_crd(info).into())?;
        }
    }

    let namespace = cmd.namespace_selection();

    let replaced =
        replace_local_in_cluster(&client, &registry, local, cluster, namespace.as_namespace())
            .await;

    connection.disconnect().await;

    let replaced = replaced?;

    println!(
        "Replaced {} {} (resourceVersion {})",
        local.kind,
        local.name,
        replaced
            .pointer("/metadata/resourceVersion")
            .and_then(|v| v.as_str())
            .unwrap_or("-")
    );

    Ok(())
}

async fn proxy(config: &Config, context: &str) -> Result<()> {
    let connection = ClusterConnection::from_config(config, KindHandlerRegistry::builtin());

    let proxy = KubectlProxy::spawn(&connection.kube_context(context, None)).await?;

    println!("Proxy for {} listening on 127.0.0.1:{}", context, proxy.port());

    let interrupt = interrupt_channel()?;

    tokio::task::spawn_blocking(move || interrupt.recv()).await??;

    proxy.shutdown().await;

    Ok(())
}

pub fn describe_event(event: &ClusterEvent) -> String {
    let (action, object) = match event {
        ClusterEvent::Applied(object) => ("APPLIED", object),
        ClusterEvent::Deleted(object) => ("DELETED", object),
        ClusterEvent::Restarted {
            kind,
            namespace,
            objects,
        } => {
            return format!(
                "RELISTED {} {} ({} objects)",
                kind,
                namespace.as_deref().unwrap_or("<cluster>"),
                objects.len()
            )
        }
    };

    let field = |pointer: &str| object.pointer(pointer).and_then(|v| v.as_str());

    match field("/metadata/namespace") {
        Some(ns) => format!(
            "{} {} {}/{}",
            action,
            field("/kind").unwrap_or("-"),
            ns,
            field("/metadata/name").unwrap_or("-")
        ),
        None => format!(
            "{} {} {}",
            action,
            field("/kind").unwrap_or("-"),
            field("/metadata/name").unwrap_or("-")
        ),
    }
}

async fn watch(cmd: &Command, config: &Config, context: &str) -> Result<()> {
    let (connection, outcome) = connect(cmd, config, context).await?;

    print_outcome(&outcome, OutputFormat::Summary)?;

    let rx = connection.events();

    println!(
        "Watching with {} watchers, Ctrl-C to stop",
        connection.watcher_count().await
    );

    let interrupt = interrupt_channel()?;
    let store = connection.store();
    let handle = tokio::runtime::Handle::current();

    tokio::task::spawn_blocking(move || loop {
        crossbeam::select! {
            recv(rx) -> event => match event {
                Ok(event) => {
                    println!("{}", describe_event(&event));

                    if let Err(e) = handle.block_on(store.apply_event(event)) {
                        eprintln!("Failed to apply event: {}", e);
                    }
                }
                Err(_) => break,
            },
            recv(interrupt) -> _ => break,
        }
    })
    .await?;

    connection.disconnect().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{ResourceOrigin, ResourceStorage};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn default_version_is_printed() {
        let versions = vec!["v1beta1".to_string(), "v1".to_string(), "v2alpha1".to_string()];

        assert_eq!(describe_default_version(&versions), "v1");
        assert_eq!(describe_default_version(&[]), FALLBACK_VERSION_NOTE);
    }

    #[test]
    fn events_are_described_with_identity() {
        let applied = ClusterEvent::Applied(json!({
            "kind": "Pod",
            "metadata": {"name": "web-0", "namespace": "prod"}
        }));
        let deleted = ClusterEvent::Deleted(json!({"kind": "Namespace", "metadata": {"name": "old"}}));

        assert_eq!(describe_event(&applied), "APPLIED Pod prod/web-0");
        assert_eq!(describe_event(&deleted), "DELETED Namespace old");

        let relisted = ClusterEvent::Restarted {
            kind: "Pod".into(),
            namespace: Some("prod".into()),
            objects: vec![json!({"kind": "Pod", "metadata": {"name": "web-0"}})],
        };

        assert_eq!(describe_event(&relisted), "RELISTED Pod prod (1 objects)");
    }

    #[test]
    fn find_named_respects_namespace_flag() {
        let resources: Vec<K8sResource> = ["staging", "prod"]
            .into_iter()
            .map(|ns| {
                K8sResource::from_object(
                    json!({"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "web", "namespace": ns}}),
                    ResourceStorage::Local,
                    ResourceOrigin::File {
                        path: format!("{ns}.yaml").into(),
                    },
                )
                .unwrap()
            })
            .collect();

        let cmd = Command::try_parse_from(["monokle", "-n", "prod", "diff", "Deployment", "web"])
            .unwrap();

        let found = find_named(&resources, &cmd, "Deployment", "web").unwrap();

        assert_eq!(found.namespace.as_deref(), Some("prod"));
    }
}
