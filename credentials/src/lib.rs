// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Strategies for obtaining cluster credentials on a hybrid node.
//!
//! Every strategy implements [CredentialProvider], so the node provider and
//! the bootstrap orchestrator never branch on which one is active. The
//! strategies differ only in their side effects:
//!
//! - [ssm] exchanges a one-time activation for a managed-instance id. The
//!   exchange needs a running agent, so the strategy also ships a
//!   [nodeadm_daemon::Daemon] that must run before any other daemon, and the
//!   id it produces becomes the node's name.
//! - [iam_roles_anywhere] writes a certificate and key minted from a
//!   caller-supplied certificate authority. Nothing runs and no identity
//!   flows back into the node configuration.

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use nodeadm_api::{CredentialProviderKind, HybridOptions, NodeConfig};
use nodeadm_host_utils::fs::{rooted, write_file, WriteFileError};
use slog::{info, Logger};
use std::sync::Arc;

pub mod client;
pub mod iam_roles_anywhere;
pub mod ssm;

pub use client::AwsClientConfig;
pub use iam_roles_anywhere::{
    CertificateAuthority, CertificateError, IamRolesAnywhereProvider,
};
pub use ssm::{SsmDaemon, SsmError, SsmProvider};

#[derive(thiserror::Error, Debug)]
pub enum CredentialError {
    #[error("Node configuration has no {0} options")]
    MissingOptions(CredentialProviderKind),

    #[error("No certificate authority was supplied")]
    MissingCertificateAuthority,

    #[error("Node configuration has no region")]
    MissingRegion,

    #[error("Node configuration has no resolved node name")]
    MissingNodeName,

    #[error(transparent)]
    Certificate(#[from] CertificateError),

    #[error(transparent)]
    Ssm(#[from] SsmError),

    #[error(transparent)]
    WriteFile(#[from] WriteFileError),

    #[error("Instance {instance_id} is still registered")]
    StillRegistered { instance_id: String },

    #[error("Credential files remain after uninstall: {}", .paths.join(", "))]
    FilesRemain { paths: Vec<String> },
}

/// A file a credential strategy needs on the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct File {
    /// Absolute path on the host.
    pub path: Utf8PathBuf,
    pub contents: Vec<u8>,
    pub mode: u32,
}

impl File {
    /// Writes the file beneath `root`, returning true if it changed.
    pub fn write(&self, root: &Utf8Path) -> Result<bool, WriteFileError> {
        write_file(&rooted(root, self.path.as_str()), &self.contents, self.mode)
    }
}

/// What a credential strategy needs to know about the node it's provisioning.
#[derive(Clone, Debug)]
pub struct NodeSpec {
    /// Short name of the role the node assumes.
    pub role: String,
    /// Operating system name, as reported by the caller.
    pub os: String,
    pub hybrid: HybridOptions,
    pub certificate_authority: Option<CertificateAuthority>,
}

impl NodeSpec {
    pub fn new(
        config: &NodeConfig,
        os: &str,
        certificate_authority: Option<CertificateAuthority>,
    ) -> Self {
        let hybrid = config.spec.hybrid.clone().unwrap_or_default();
        // "arn:aws:iam::123456789012:role/path/node-role" -> "node-role"
        let role = hybrid
            .iam_roles_anywhere
            .as_ref()
            .and_then(|ira| ira.role_arn.rsplit('/').next())
            .filter(|role| !role.is_empty() && !role.contains(':'))
            .unwrap_or("node")
            .to_string();
        Self { role, os: os.to_string(), hybrid, certificate_authority }
    }
}

/// A strategy yielding cluster authentication material.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    fn name(&self) -> CredentialProviderKind;

    /// The authentication portion of the node configuration, with defaults
    /// filled in.
    fn nodeadm_config(
        &self,
        node: &NodeSpec,
    ) -> Result<HybridOptions, CredentialError>;

    /// Files to write before daemons start. Empty if none are needed.
    fn files_for_node(
        &self,
        node: &NodeSpec,
    ) -> Result<Vec<File>, CredentialError>;

    /// Files read by the API client's credential chain.
    fn client_files(
        &self,
        config: &NodeConfig,
    ) -> Result<Vec<File>, CredentialError>;

    /// Confirms the node's registration was retired at uninstall time.
    async fn verify_uninstall(
        &self,
        instance_id: &str,
    ) -> Result<(), CredentialError>;
}

pub type BoxedCredentialProvider = Arc<dyn CredentialProvider>;

/// Writes the strategy's files and resolves the API client configuration.
///
/// A certificate-based strategy invoked without a certificate authority keeps
/// whatever certificate is already on the host.
pub fn configure_client(
    log: &Logger,
    root: &Utf8Path,
    config: &NodeConfig,
    provider: &dyn CredentialProvider,
    node: &NodeSpec,
) -> Result<AwsClientConfig, CredentialError> {
    let log = log.new(slog::o!(
        "credential_provider" => provider.name().to_string()
    ));
    let mut files = match provider.files_for_node(node) {
        Ok(files) => files,
        Err(CredentialError::MissingCertificateAuthority) => {
            info!(log, "no certificate authority; keeping existing files");
            Vec::new()
        }
        Err(err) => return Err(err),
    };
    files.extend(provider.client_files(config)?);
    for file in &files {
        let changed = file.write(root)?;
        info!(
            log,
            "wrote credential file";
            "path" => %file.path,
            "changed" => changed,
        );
    }
    AwsClientConfig::for_node(config)
}
