use std::fmt::Display;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display as StrumDisplay};
use thiserror::Error as TError;

pub use anyhow::{anyhow, Result};

/// Setup and connectivity failure codes surfaced to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, AsRefStr, Serialize, Deserialize)]
pub enum ClusterErrorCode {
    KubeconfigNotFound,
    ContextNotFound,
    ClientSetupFailed,
    HealthCheckFailed,
    ProxySpawnFailed,
    ProxyExited,
    LoadFailed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, TError)]
#[error("{code}: {message}")]
pub struct MonokleClusterError {
    pub code: ClusterErrorCode,
    pub message: String,
}

impl MonokleClusterError {
    pub fn new(code: ClusterErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Keeps only the human readable message of `err`.
    pub fn from_error(code: ClusterErrorCode, err: impl Display) -> Self {
        Self::new(code, err.to_string())
    }

    pub fn cancelled() -> Self {
        Self::new(ClusterErrorCode::Cancelled, "load was superseded by a newer request")
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == ClusterErrorCode::Cancelled
    }

    pub fn alert(&self) -> Alert {
        let title = match self.code {
            ClusterErrorCode::KubeconfigNotFound => "Kubeconfig Not Found",
            ClusterErrorCode::ContextNotFound => "Context Not Found",
            ClusterErrorCode::ClientSetupFailed => "Cluster Connection Failed",
            ClusterErrorCode::HealthCheckFailed => "Cluster Not Reachable",
            ClusterErrorCode::ProxySpawnFailed | ClusterErrorCode::ProxyExited => {
                "Cluster Proxy Failed"
            }
            ClusterErrorCode::LoadFailed => "Cluster Resources Failed",
            ClusterErrorCode::Cancelled => "Cluster Load Cancelled",
        };

        Alert::new(AlertType::Error, title, self.message.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AlertType {
    Success,
    Info,
    Warning,
    Error,
}

/// Payload rendered by a front-end as a toast or banner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub title: String,
    pub message: String,
}

impl Alert {
    pub fn new(alert_type: AlertType, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            alert_type,
            title: title.into(),
            message: message.into(),
        }
    }
}

impl Display for Alert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.alert_type, self.title, self.message)
    }
}

/// Rejected outcome of a cluster load.
#[derive(Debug, Clone, TError)]
pub enum ClusterLoadError {
    #[error("{0}")]
    Failed(Alert),
    #[error(transparent)]
    Cluster(#[from] MonokleClusterError),
}

impl ClusterLoadError {
    pub fn alert(&self) -> Alert {
        match self {
            Self::Failed(alert) => alert.clone(),
            Self::Cluster(err) => err.alert(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cluster(err) if err.is_cancelled())
    }
}
