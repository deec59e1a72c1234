use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::{
    cluster::NamespaceSelection,
    config::{xdg_config_home, Config, ConfigLoadOption},
};

use super::SubCommand;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, disable_help_subcommand = true)]
pub struct Command {
    /// kubeconfig path
    #[arg(short = 'C', long, global = true, display_order = 1000)]
    pub kubeconfig: Option<PathBuf>,

    /// Context
    #[arg(short, long, global = true, display_order = 1000)]
    pub context: Option<String>,

    /// Namespace, `<all>` or `<not-namespaced>`
    #[arg(short, long, global = true, display_order = 1000)]
    pub namespace: Option<String>,

    /// Project root holding local manifests and `.monokle`
    #[arg(short, long, global = true, display_order = 1000)]
    pub project: Option<PathBuf>,

    /// Config file path
    #[arg(long, global = true, display_order = 1000)]
    pub config_file: Option<PathBuf>,

    /// Logging
    #[arg(short = 'l', long, global = true, display_order = 1000)]
    pub logging: bool,

    /// Go through `kubectl proxy`
    #[arg(long, global = true, display_order = 1000)]
    pub proxy: bool,

    #[command(subcommand)]
    pub subcommand: SubCommand,
}

impl Command {
    pub fn init() -> Self {
        Self::parse()
    }

    pub fn namespace_selection(&self) -> NamespaceSelection {
        match &self.namespace {
            Some(ns) => ns.parse().unwrap_or_default(),
            None => NamespaceSelection::All,
        }
    }

    pub fn project_root(&self) -> Result<PathBuf> {
        match &self.project {
            Some(path) => Ok(path.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }

    pub fn config_load_option(&self) -> Result<ConfigLoadOption> {
        let option = if let Some(path) = &self.config_file {
            match path.try_exists() {
                Ok(true) => ConfigLoadOption::Path(path.clone()),
                Ok(false) => {
                    eprintln!("Config file not found: {:?}", path);

                    ConfigLoadOption::Default
                }
                Err(err) => {
                    eprintln!("Failed to check config file exists: {}", err);

                    ConfigLoadOption::Default
                }
            }
        } else {
            match xdg_config_home().map(|dir| dir.join("config.yaml")) {
                Some(path) if path.try_exists().unwrap_or(false) => ConfigLoadOption::Path(path),
                _ => ConfigLoadOption::Default,
            }
        };

        Ok(option)
    }

    /// Loads the layered config and applies the command line on top.
    pub fn load_config(&self) -> Result<Config> {
        let project_root = self.project_root()?;

        let mut config = Config::load(self.config_load_option()?, Some(&project_root))?;

        if let Some(path) = &self.kubeconfig {
            config.prefer_kubeconfig(path.clone());
        }

        if let Some(context) = &self.context {
            config.settings.current_context = Some(context.clone());
        }

        if self.proxy {
            config.settings.use_kubectl_proxy = true;
        }

        Ok(config)
    }
}
