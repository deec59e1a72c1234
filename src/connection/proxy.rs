use std::{future::Future, process::Stdio};

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::{
    io::{AsyncBufReadExt as _, AsyncReadExt as _, BufReader, Lines},
    process::{Child, ChildStdout},
    sync::{oneshot, watch},
    task::JoinHandle,
};

use crate::{
    command::{kubectl_command, CommandSpec, KubeContext},
    error::{ClusterErrorCode, MonokleClusterError},
    logger,
};

static PROXY_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"127\.0\.0\.1:([0-9]+)").expect("invalid regex"));

/// Port printed by `kubectl proxy` on its first line, e.g.
/// `Starting to serve on 127.0.0.1:39321`.
pub fn parse_proxy_port(line: &str) -> Option<u16> {
    PROXY_ADDRESS
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|port| port.as_str().parse().ok())
}

pub fn proxy_command(ctx: &KubeContext) -> CommandSpec {
    let ctx = KubeContext {
        proxy_port: None,
        ..ctx.clone()
    };

    kubectl_command(&ctx, ["proxy", "--port=0"])
}

type ExitSignal = watch::Receiver<Option<MonokleClusterError>>;

/// Owns the child once it listens. Drains stdout, reports the exit and
/// kills the process when `stop` fires or its sender is dropped.
async fn supervise(
    mut child: Child,
    mut stdout: Lines<BufReader<ChildStdout>>,
    mut stop: oneshot::Receiver<()>,
    exit: watch::Sender<Option<MonokleClusterError>>,
) {
    let mut stdout_open = true;

    loop {
        tokio::select! {
            status = child.wait() => {
                let err = match status {
                    Ok(status) => MonokleClusterError::new(
                        ClusterErrorCode::ProxyExited,
                        format!("proxy exited ({})", status),
                    ),
                    Err(e) => MonokleClusterError::from_error(ClusterErrorCode::ProxyExited, e),
                };

                logger!(error, "{}", err);

                exit.send_replace(Some(err));
                break;
            }
            _ = &mut stop => {
                if let Err(e) = child.kill().await {
                    logger!(warn, "Failed to stop proxy: {}", e);
                }
                break;
            }
            line = stdout.next_line(), if stdout_open => match line {
                Ok(Some(line)) => logger!(debug, "proxy: {}", line),
                _ => stdout_open = false,
            },
        }
    }
}

/// A running `kubectl proxy`. The process is killed when this is dropped.
#[derive(Debug)]
pub struct KubectlProxy {
    port: u16,
    exit: ExitSignal,
    stop: Option<oneshot::Sender<()>>,
    supervisor: JoinHandle<()>,
}

impl KubectlProxy {
    pub async fn spawn(ctx: &KubeContext) -> Result<Self, MonokleClusterError> {
        Self::spawn_command(&proxy_command(ctx)).await
    }

    /// Starts `spec` and waits until it prints the address it listens on.
    pub async fn spawn_command(spec: &CommandSpec) -> Result<Self, MonokleClusterError> {
        logger!(info, "Starting {}", spec);

        let mut child = spec
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MonokleClusterError::from_error(ClusterErrorCode::ProxySpawnFailed, e))?;

        let Some(stdout) = child.stdout.take() else {
            return Err(MonokleClusterError::new(
                ClusterErrorCode::ProxySpawnFailed,
                "proxy stdout is not available",
            ));
        };

        let mut lines = BufReader::new(stdout).lines();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    logger!(debug, "proxy: {}", line);

                    if let Some(port) = parse_proxy_port(&line) {
                        logger!(info, "Proxy listening on port {}", port);

                        let (exit_tx, exit) = watch::channel(None);
                        let (stop, stop_rx) = oneshot::channel();

                        let supervisor = tokio::spawn(supervise(child, lines, stop_rx, exit_tx));

                        return Ok(Self {
                            port,
                            exit,
                            stop: Some(stop),
                            supervisor,
                        });
                    }
                }
                Ok(None) => return Err(Self::exited_early(&mut child).await),
                Err(e) => {
                    return Err(MonokleClusterError::from_error(
                        ClusterErrorCode::ProxySpawnFailed,
                        e,
                    ))
                }
            }
        }
    }

    async fn exited_early(child: &mut Child) -> MonokleClusterError {
        let mut stderr = String::new();

        if let Some(mut pipe) = child.stderr.take() {
            if let Err(e) = pipe.read_to_string(&mut stderr).await {
                logger!(warn, "Failed to read proxy stderr: {}", e);
            }
        }

        let status = match child.wait().await {
            Ok(status) => status.to_string(),
            Err(e) => e.to_string(),
        };

        let message = match stderr.trim() {
            "" => format!("proxy exited before listening ({})", status),
            stderr => format!("proxy exited before listening ({}): {}", status, stderr),
        };

        logger!(error, "{}", message);

        MonokleClusterError::new(ClusterErrorCode::ProxyExited, message)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `Some` once the process has gone away.
    pub fn check_exited(&self) -> Option<MonokleClusterError> {
        self.exit.borrow().clone()
    }

    /// Resolves with the exit error once the process goes away on its
    /// own, or with `None` when it was stopped through this handle.
    pub fn exited(&self) -> impl Future<Output = Option<MonokleClusterError>> + Send + 'static {
        let mut exit = self.exit.clone();

        async move {
            let exited = exit.wait_for(Option::is_some).await.map(|err| (*err).clone());

            exited.ok().flatten()
        }
    }

    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }

        if let Err(e) = (&mut self.supervisor).await {
            logger!(warn, "Proxy supervisor failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::time::Duration;

    #[rstest]
    #[case("Starting to serve on 127.0.0.1:39321", Some(39321))]
    #[case("Starting to serve on 127.0.0.1:8001\n", Some(8001))]
    #[case("Starting to serve on [::]:8001", None)]
    #[case("error: unknown flag", None)]
    fn parses_port(#[case] line: &str, #[case] expected: Option<u16>) {
        assert_eq!(parse_proxy_port(line), expected);
    }

    #[test]
    fn proxy_command_keeps_context_and_asks_for_random_port() {
        let ctx = KubeContext {
            context: Some("dev".into()),
            kubeconfig: None,
            proxy_port: Some(8001),
        };

        assert_eq!(
            proxy_command(&ctx).to_string(),
            "kubectl --context dev proxy --port=0"
        );
    }

    #[tokio::test]
    async fn missing_binary_fails_to_spawn() {
        let err = KubectlProxy::spawn_command(&CommandSpec::new("monokle-test-no-such-kubectl"))
            .await
            .unwrap_err();

        assert_eq!(err.code, ClusterErrorCode::ProxySpawnFailed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_port_from_stdout() {
        let spec = CommandSpec::new("sh").args([
            "-c",
            "echo 'Starting to serve on 127.0.0.1:38123'; sleep 30",
        ]);

        let proxy = KubectlProxy::spawn_command(&spec).await.unwrap();

        assert_eq!(proxy.port(), 38123);
        assert!(proxy.check_exited().is_none());

        proxy.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn early_exit_is_reported() {
        let spec = CommandSpec::new("sh").args(["-c", "echo 'context not found' >&2; exit 1"]);

        let err = KubectlProxy::spawn_command(&spec).await.unwrap_err();

        assert_eq!(err.code, ClusterErrorCode::ProxyExited);
        assert!(err.message.contains("context not found"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_after_listening_is_signalled() {
        let spec = CommandSpec::new("sh").args([
            "-c",
            "echo 'Starting to serve on 127.0.0.1:38124'; sleep 1; exit 3",
        ]);

        let proxy = KubectlProxy::spawn_command(&spec).await.unwrap();

        let err = tokio::time::timeout(Duration::from_secs(10), proxy.exited())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(err.code, ClusterErrorCode::ProxyExited);
        assert_eq!(proxy.check_exited(), Some(err));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shutdown_is_not_reported_as_exit() {
        let spec = CommandSpec::new("sh").args([
            "-c",
            "echo 'Starting to serve on 127.0.0.1:38125'; sleep 30",
        ]);

        let proxy = KubectlProxy::spawn_command(&spec).await.unwrap();
        let exited = proxy.exited();

        proxy.shutdown().await;

        assert_eq!(exited.await, None);
    }
}
