// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Node providers: everything the orchestrator needs to know about one node.
//!
//! A provider is built from a configuration source. Construction loads,
//! validates and enriches the [NodeConfig] and decides, once, which aspects
//! and daemons the node gets. Nothing about that decision is revisited while
//! the phases run.

use crate::aspect::BoxedAspect;
use crate::config_source::{ConfigSource, ConfigSourceError};
use crate::imds::{ImdsError, InstanceMetadata};
use async_trait::async_trait;
use camino::Utf8PathBuf;
use nodeadm_api::{CredentialProviderKind, NodeConfig, ValidationError};
use nodeadm_credentials::{
    AwsClientConfig, CertificateAuthority, CredentialError, SsmError,
};
use nodeadm_daemon::{BoxedDaemon, DaemonError};
use nodeadm_host_utils::host::BoxedExecutor;
use nodeadm_host_utils::systemd::{BoxedServiceManager, ServiceManagerError};
use slog::Logger;
use std::collections::BTreeSet;
use std::time::Duration;

mod ec2;
mod hybrid;
mod sandbox;

pub use ec2::Ec2NodeProvider;
pub use hybrid::HybridNodeProvider;
pub use sandbox::sandbox_image;

#[derive(thiserror::Error, Debug)]
pub enum ProviderError {
    #[error(transparent)]
    ConfigSource(#[from] ConfigSourceError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Failed to describe this instance")]
    Imds(#[from] ImdsError),

    #[error("Credential provider {kind} cannot be used on {node} nodes")]
    UnsupportedCredentialProvider {
        kind: CredentialProviderKind,
        node: &'static str,
    },

    #[error("Unknown daemon {name:?} (expected one of: {})", .known.join(", "))]
    UnknownDaemon { name: String, known: Vec<&'static str> },

    #[error("Daemon {daemon} failed")]
    Daemon {
        daemon: &'static str,
        #[source]
        err: DaemonError,
    },

    #[error(transparent)]
    Ssm(#[from] SsmError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("Failed to release the service manager")]
    ServiceManager(#[from] ServiceManagerError),
}

impl ProviderError {
    /// Errors caused by how the program was invoked rather than by the host.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            ProviderError::UnknownDaemon { .. }
                | ProviderError::ConfigSource(
                    ConfigSourceError::Unsupported(_)
                )
        )
    }
}

/// Handles to the host a provider acts on.
#[derive(Clone)]
pub struct HostEnv {
    /// Prefixed to every path written; `/` on a real host.
    pub root: Utf8PathBuf,
    pub executor: BoxedExecutor,
    pub service_manager: BoxedServiceManager,
}

/// Caller-supplied settings that aren't part of the node configuration.
#[derive(Clone, Debug, Default)]
pub struct ProviderOptions {
    /// Operating system name, used to derive certificate subjects.
    pub os: String,
    /// Signs node certificates for certificate-based credentials.
    pub certificate_authority: Option<CertificateAuthority>,
    /// Restricts the run to these daemons. Empty means all of them.
    pub daemon_filter: Vec<String>,
    /// Overrides how long to wait for a managed-instance id.
    pub registration_timeout: Option<Duration>,
}

/// A validated, enriched node and the steps that bootstrap it.
#[async_trait]
pub trait NodeProvider: Send {
    fn log(&self) -> &Logger;

    fn config(&self) -> &NodeConfig;

    /// Host setup steps, in order. Empty for hybrid nodes.
    fn aspects(&self) -> Vec<BoxedAspect>;

    /// Daemons to manage, in order, with any daemon filter applied.
    fn daemons(&self) -> Vec<BoxedDaemon>;

    /// Work that must finish before any other daemon is meaningful.
    async fn pre_process_daemon(&mut self) -> Result<(), ProviderError>;

    /// Writes credential material and resolves the API client.
    async fn configure_credentials(
        &mut self,
    ) -> Result<AwsClientConfig, ProviderError>;

    /// Releases handles opened during construction.
    fn cleanup(&mut self) -> Result<(), ProviderError>;
}

/// Loads the configuration from `source` and builds the matching provider.
pub async fn build(
    log: &Logger,
    env: HostEnv,
    source: &ConfigSource,
    imds: &dyn InstanceMetadata,
    options: ProviderOptions,
) -> Result<Box<dyn NodeProvider>, ProviderError> {
    let config = source.load(imds).await?;
    let origin = source.origin();
    if config.is_hybrid() {
        let provider =
            HybridNodeProvider::new(log, env, config, origin, options)?;
        Ok(Box::new(provider))
    } else {
        let provider =
            Ec2NodeProvider::new(log, env, config, origin, imds, options)
                .await?;
        Ok(Box::new(provider))
    }
}

/// The subset of daemons a run may touch.
#[derive(Clone, Debug)]
pub(crate) struct DaemonFilter(Option<BTreeSet<String>>);

impl DaemonFilter {
    /// Fails if `names` mentions a daemon this node doesn't have.
    pub fn new(
        names: &[String],
        known: &[&'static str],
    ) -> Result<Self, ProviderError> {
        if names.is_empty() {
            return Ok(Self(None));
        }
        if let Some(name) = names.iter().find(|n| !known.contains(&n.as_str()))
        {
            return Err(ProviderError::UnknownDaemon {
                name: name.clone(),
                known: known.to_vec(),
            });
        }
        Ok(Self(Some(names.iter().cloned().collect())))
    }

    pub fn allows(&self, name: &str) -> bool {
        self.0.as_ref().map_or(true, |names| names.contains(name))
    }

    pub fn apply(&self, daemons: &[BoxedDaemon]) -> Vec<BoxedDaemon> {
        daemons.iter().filter(|d| self.allows(d.name())).cloned().collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_daemon_filter() {
        let known = ["ssm", "containerd", "kubelet"];
        let all = DaemonFilter::new(&[], &known).unwrap();
        assert!(known.iter().all(|name| all.allows(name)));

        let some = DaemonFilter::new(&["kubelet".to_string()], &known).unwrap();
        assert!(some.allows("kubelet"));
        assert!(!some.allows("containerd"));

        let err =
            DaemonFilter::new(&["docker".to_string()], &known).unwrap_err();
        assert!(err.is_usage_error());
        assert_eq!(
            err.to_string(),
            "Unknown daemon \"docker\" (expected one of: ssm, containerd, \
             kubelet)"
        );
    }
}
