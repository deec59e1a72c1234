use std::path::PathBuf;

use anyhow::{anyhow, Result};
use kube::config::{Kubeconfig, NamedContext};

use crate::logger;

/// Reads and merges every kubeconfig in `paths`. Earlier files win on
/// conflicting entries, matching kubectl's KUBECONFIG semantics.
/// With no paths the default kubeconfig location is used.
pub fn read_kubeconfig(paths: &[PathBuf]) -> Result<Kubeconfig> {
    let mut merged: Option<Kubeconfig> = None;

    for path in paths {
        if !path.exists() {
            logger!(debug, "kubeconfig {} does not exist; skipping", path.display());
            continue;
        }

        let config = Kubeconfig::read_from(path)?;

        merged = Some(match merged {
            Some(current) => current.merge(config)?,
            None => config,
        });
    }

    match merged {
        Some(config) => Ok(config),
        None if paths.is_empty() => Ok(Kubeconfig::read()?),
        None => Err(anyhow!(
            "Cannot read kubeconfig from {}",
            paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )),
    }
}

/// Picks the named context, falling back to `current-context` and then to
/// the first context in the file.
pub fn resolve_context<'a>(
    kubeconfig: &'a Kubeconfig,
    context: Option<&str>,
) -> Result<&'a NamedContext> {
    let find = |name: &str| {
        kubeconfig
            .contexts
            .iter()
            .find(|ctx| ctx.name == name)
            .ok_or_else(|| anyhow!(format!("Cannot find context {}", name)))
    };

    if let Some(context) = context {
        find(context)
    } else if let Some(current_context) = &kubeconfig.current_context {
        find(current_context)
    } else {
        kubeconfig
            .contexts
            .first()
            .ok_or_else(|| anyhow!("Empty contexts"))
    }
}
