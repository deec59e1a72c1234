use std::{ffi::OsString, path::PathBuf, process::Stdio};

use anyhow::{Context as _, Result};
use tokio::process::Command as TokioCommand;

use crate::{kube::proxy_url, logger};

pub const KUBECTL: &str = "kubectl";
pub const HELM: &str = "helm";

/// Cluster a command runs against. Passed explicitly to every builder.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KubeContext {
    pub context: Option<String>,
    pub kubeconfig: Option<PathBuf>,
    pub proxy_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<OsString>,
    pub envs: Vec<(String, OsString)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn to_command(&self) -> TokioCommand {
        let mut cmd = TokioCommand::new(&self.program);
        cmd.args(&self.args).envs(self.envs.iter().map(|(k, v)| (k, v)));
        cmd
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// `kubectl` bound to `ctx`. Through a proxy only the server flag is
/// passed; the kubeconfig and its credentials stay with the proxy.
pub fn kubectl_command<I, S>(ctx: &KubeContext, args: I) -> CommandSpec
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    let mut spec = CommandSpec::new(KUBECTL);

    match ctx.proxy_port {
        Some(port) => spec = spec.arg(format!("--server={}", proxy_url(port))),
        None => {
            if let Some(kubeconfig) = &ctx.kubeconfig {
                spec = spec.arg("--kubeconfig").arg(kubeconfig);
            }

            if let Some(context) = &ctx.context {
                spec = spec.arg("--context").arg(context);
            }
        }
    }

    spec.args(args)
}

/// `helm` bound to `ctx`. Helm reads the cluster from its own flags.
pub fn helm_command<I, S>(ctx: &KubeContext, args: I) -> CommandSpec
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    let mut spec = CommandSpec::new(HELM).args(args);

    match ctx.proxy_port {
        Some(port) => spec = spec.arg("--kube-apiserver").arg(proxy_url(port)),
        None => {
            if let Some(kubeconfig) = &ctx.kubeconfig {
                spec = spec.arg("--kubeconfig").arg(kubeconfig);
            }

            if let Some(context) = &ctx.context {
                spec = spec.arg("--kube-context").arg(context);
            }
        }
    }

    spec
}

pub async fn run_command(spec: &CommandSpec) -> Result<CommandOutput> {
    logger!(debug, "Running {}", spec);

    let output = spec
        .to_command()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .with_context(|| format!("failed to execute {}", spec.program))?;

    let output = CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code(),
    };

    if !output.success() {
        logger!(warn, "{} exited with {:?}", spec.program, output.exit_code);
    }

    Ok(output)
}
