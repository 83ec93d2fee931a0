// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Services the bootstrap agent configures and starts on a node.
//!
//! Each service implements [Daemon]. The bootstrap orchestrator drives every
//! daemon through the same lifecycle, strictly in list order:
//!
//! 1. [Daemon::configure] renders on-disk configuration from the
//!    [NodeConfig]. It must be safe to call repeatedly.
//! 2. [Daemon::ensure_running] starts the service, or confirms it is healthy.
//! 3. [Daemon::post_launch] does anything that needs the service to be up.

use async_trait::async_trait;
use nodeadm_api::NodeConfig;
use nodeadm_host_utils::fs::WriteFileError;
use nodeadm_host_utils::systemd::ServiceManagerError;
use std::sync::Arc;

pub mod containerd;
pub mod kubelet;
mod unit;

pub use containerd::Containerd;
pub use kubelet::Kubelet;

#[derive(thiserror::Error, Debug)]
pub enum DaemonError {
    #[error(transparent)]
    WriteFile(#[from] WriteFileError),

    #[error(transparent)]
    ServiceManager(#[from] ServiceManagerError),

    #[error("Failed to render {what}")]
    Render {
        what: &'static str,
        #[source]
        err: serde_json::Error,
    },

    #[error("Cluster certificate authority is not valid base64")]
    CertificateAuthority(#[source] base64::DecodeError),

    #[error("No node name has been resolved")]
    MissingNodeName,

    #[error("No sandbox image has been resolved")]
    MissingSandboxImage,

    /// Failures from daemons implemented outside this crate.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl DaemonError {
    pub fn other<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        DaemonError::Other(Box::new(err))
    }
}

/// A managed service on the node.
#[async_trait]
pub trait Daemon: Send + Sync {
    /// Stable identifier, unique within one run.
    fn name(&self) -> &'static str;

    async fn configure(&self, config: &NodeConfig) -> Result<(), DaemonError>;

    async fn ensure_running(&self) -> Result<(), DaemonError>;

    async fn post_launch(&self, config: &NodeConfig)
        -> Result<(), DaemonError>;
}

pub type BoxedDaemon = Arc<dyn Daemon>;
