// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Credentials from a managed-instance registration.
//!
//! The node trades a one-time activation code and id for a managed-instance
//! id (`mi-...`). The SSM agent performs the exchange and records the result
//! in its registration file; the agent then keeps a shared credentials file
//! up to date for the rest of the node's life.

use crate::{CredentialError, CredentialProvider, File, NodeSpec};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use nodeadm_api::{
    CredentialProviderKind, HybridOptions, NodeConfig, SsmOptions,
};
use nodeadm_common::backoff::{
    registration_policy, retry_notify, BackoffError,
};
use nodeadm_daemon::{Daemon, DaemonError};
use nodeadm_host_utils::fs::{read_optional, rooted, WriteFileError};
use nodeadm_host_utils::host::{BoxedExecutor, ExecutionError};
use nodeadm_host_utils::systemd::{BoxedServiceManager, ServiceManagerError};
use serde::Deserialize;
use slog::{info, warn, Logger};
use std::time::Duration;
use tokio::process::Command;

pub const NAME: &str = "ssm";
pub const AGENT_UNIT: &str = "amazon-ssm-agent";
pub const AGENT_BINARY: &str = "/usr/bin/amazon-ssm-agent";
pub const REGISTRATION_PATH: &str = "/var/lib/amazon/ssm/registration";

const DEFAULT_REGISTRATION_TIMEOUT: Duration = Duration::from_secs(15 * 60);
const MANAGED_INSTANCE_PREFIX: &str = "mi-";

#[derive(thiserror::Error, Debug)]
pub enum SsmError {
    #[error("Node configuration has no SSM options")]
    MissingOptions,

    #[error("Node configuration has no region")]
    MissingRegion,

    #[error("Failed to register with the activation")]
    Register(#[source] ExecutionError),

    #[error("Failed to read registration file")]
    ReadRegistration(#[source] WriteFileError),

    #[error("Registration file {path} is malformed")]
    ParseRegistration {
        path: Utf8PathBuf,
        #[source]
        err: serde_json::Error,
    },

    #[error("No managed-instance id has been assigned")]
    NotRegistered,

    #[error("No managed-instance id was assigned within {0:?}")]
    RegistrationTimeout(Duration),

    #[error(transparent)]
    ServiceManager(#[from] ServiceManagerError),
}

impl From<SsmError> for DaemonError {
    fn from(err: SsmError) -> Self {
        DaemonError::other(err)
    }
}

/// The contents of the agent's registration file.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Registration {
    #[serde(rename = "ManagedInstanceID")]
    pub managed_instance_id: String,
    #[serde(rename = "Region")]
    pub region: String,
}

impl Registration {
    fn is_assigned(&self) -> bool {
        self.managed_instance_id.starts_with(MANAGED_INSTANCE_PREFIX)
    }
}

/// Reads the registration recorded beneath `root`, if any.
pub fn read_registration(
    root: &Utf8Path,
) -> Result<Option<Registration>, SsmError> {
    let path = rooted(root, REGISTRATION_PATH);
    let Some(contents) =
        read_optional(&path).map_err(SsmError::ReadRegistration)?
    else {
        return Ok(None);
    };
    if contents.trim().is_empty() {
        return Ok(None);
    }
    let registration: Registration = serde_json::from_str(&contents)
        .map_err(|err| SsmError::ParseRegistration { path, err })?;
    Ok(registration.is_assigned().then_some(registration))
}

/// The managed-instance registration strategy.
pub struct SsmProvider {
    root: Utf8PathBuf,
}

impl SsmProvider {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl CredentialProvider for SsmProvider {
    fn name(&self) -> CredentialProviderKind {
        CredentialProviderKind::Ssm
    }

    fn nodeadm_config(
        &self,
        node: &NodeSpec,
    ) -> Result<HybridOptions, CredentialError> {
        let ssm = node
            .hybrid
            .ssm
            .clone()
            .ok_or(CredentialError::MissingOptions(self.name()))?;
        Ok(HybridOptions { ssm: Some(ssm), iam_roles_anywhere: None })
    }

    fn files_for_node(
        &self,
        _node: &NodeSpec,
    ) -> Result<Vec<File>, CredentialError> {
        Ok(Vec::new())
    }

    fn client_files(
        &self,
        _config: &NodeConfig,
    ) -> Result<Vec<File>, CredentialError> {
        // The agent maintains the shared credentials file itself.
        Ok(Vec::new())
    }

    async fn verify_uninstall(
        &self,
        instance_id: &str,
    ) -> Result<(), CredentialError> {
        match read_registration(&self.root)? {
            Some(registration)
                if registration.managed_instance_id == instance_id =>
            {
                Err(CredentialError::StillRegistered {
                    instance_id: instance_id.to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// The SSM agent, which performs the registration.
///
/// This daemon must run before every other daemon: they are configured with
/// the managed-instance id as the node name.
pub struct SsmDaemon {
    log: Logger,
    root: Utf8PathBuf,
    executor: BoxedExecutor,
    service_manager: BoxedServiceManager,
    registration_timeout: Duration,
}

impl SsmDaemon {
    pub fn new(
        log: &Logger,
        root: Utf8PathBuf,
        executor: BoxedExecutor,
        service_manager: BoxedServiceManager,
    ) -> Self {
        Self {
            log: log.new(slog::o!("daemon" => NAME)),
            root,
            executor,
            service_manager,
            registration_timeout: DEFAULT_REGISTRATION_TIMEOUT,
        }
    }

    /// Bounds how long [Daemon::configure] waits for an id to be assigned.
    pub fn with_registration_timeout(mut self, timeout: Duration) -> Self {
        self.registration_timeout = timeout;
        self
    }

    /// The managed-instance id assigned to this node, if any.
    pub fn managed_instance_id(&self) -> Result<Option<String>, SsmError> {
        Ok(read_registration(&self.root)?
            .map(|registration| registration.managed_instance_id))
    }

    async fn register(
        &self,
        options: &SsmOptions,
        region: &str,
    ) -> Result<(), SsmError> {
        info!(
            self.log,
            "registering managed instance";
            "activation_id" => &options.activation_id,
            "region" => region,
        );
        let mut cmd = Command::new(AGENT_BINARY);
        cmd.args([
            "-register",
            "-code",
            &options.activation_code,
            "-id",
            &options.activation_id,
            "-region",
            region,
            "-y",
        ]);
        self.executor
            .execute_async(&mut cmd)
            .await
            .map_err(SsmError::Register)?;
        Ok(())
    }

    async fn wait_for_registration(&self) -> Result<String, SsmError> {
        let log = &self.log;
        let root = &self.root;
        let timeout = self.registration_timeout;
        retry_notify(
            registration_policy(timeout),
            || async move {
                match read_registration(root) {
                    Ok(Some(registration)) => {
                        Ok(registration.managed_instance_id)
                    }
                    Ok(None) => {
                        Err(BackoffError::transient(SsmError::NotRegistered))
                    }
                    Err(err) => Err(BackoffError::permanent(err)),
                }
            },
            |err: SsmError, delay: Duration| {
                warn!(
                    log,
                    "waiting for managed-instance id";
                    "error" => %err,
                    "retry_after" => ?delay,
                );
            },
        )
        .await
        .map_err(|err| match err {
            SsmError::NotRegistered => SsmError::RegistrationTimeout(timeout),
            err => err,
        })
    }
}

#[async_trait]
impl Daemon for SsmDaemon {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn configure(&self, config: &NodeConfig) -> Result<(), DaemonError> {
        if let Some(id) = self.managed_instance_id()? {
            info!(
                self.log,
                "already registered; skipping activation";
                "managed_instance_id" => id,
            );
            return Ok(());
        }

        let options = config
            .spec
            .hybrid
            .as_ref()
            .and_then(|hybrid| hybrid.ssm.as_ref())
            .ok_or(SsmError::MissingOptions)?;
        let region = config.region().ok_or(SsmError::MissingRegion)?;
        self.register(options, region).await?;

        let id = self.wait_for_registration().await?;
        info!(self.log, "registered"; "managed_instance_id" => id);
        Ok(())
    }

    async fn ensure_running(&self) -> Result<(), DaemonError> {
        let sm = &self.service_manager;
        sm.enable(AGENT_UNIT).await.map_err(SsmError::from)?;
        if !sm.is_active(AGENT_UNIT).await.map_err(SsmError::from)? {
            sm.start(AGENT_UNIT).await.map_err(SsmError::from)?;
        }
        Ok(())
    }

    async fn post_launch(
        &self,
        _config: &NodeConfig,
    ) -> Result<(), DaemonError> {
        let id = self.managed_instance_id()?.ok_or(SsmError::NotRegistered)?;
        info!(self.log, "agent running"; "managed_instance_id" => id);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use nodeadm_api::{ClusterDetails, NodeConfigSpec};
    use nodeadm_host_utils::fakes::systemd::ServiceManager;
    use nodeadm_host_utils::host::{FakeExecutor, Output, OutputExt};
    use nodeadm_test_utils::dev::test_setup_log;

    const REGISTRATION: &str =
        r#"{"ManagedInstanceID":"mi-0123456789abcdef0","Region":"us-west-2"}"#;

    fn config() -> NodeConfig {
        NodeConfig::new(NodeConfigSpec {
            cluster: ClusterDetails {
                region: Some("us-west-2".to_string()),
                ..Default::default()
            },
            hybrid: Some(HybridOptions {
                ssm: Some(SsmOptions {
                    activation_code: "code".to_string(),
                    activation_id: "id".to_string(),
                }),
                iam_roles_anywhere: None,
            }),
            ..Default::default()
        })
    }

    fn write_registration(root: &Utf8Path) {
        let path = rooted(root, REGISTRATION_PATH);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, REGISTRATION).unwrap();
    }

    #[tokio::test]
    async fn test_registers_and_waits_for_id() {
        let logctx = test_setup_log("test_registers_and_waits_for_id");
        let dir = Utf8TempDir::new().unwrap();
        let executor = FakeExecutor::new(logctx.log.clone());
        let root = dir.path().to_owned();
        executor.set_wait_handler(Box::new(move |cmd| {
            if cmd.get_args().any(|arg| arg == "-register") {
                write_registration(&root);
            }
            Output::success()
        }));
        let daemon = SsmDaemon::new(
            &logctx.log,
            dir.path().to_owned(),
            executor.clone().as_executor(),
            ServiceManager::new().as_service_manager(),
        );

        daemon.configure(&config()).await.unwrap();
        assert_eq!(
            executor.commands(),
            vec![format!(
                "{AGENT_BINARY} -register -code code -id id \
                 -region us-west-2 -y"
            )]
        );
        assert_eq!(
            daemon.managed_instance_id().unwrap().as_deref(),
            Some("mi-0123456789abcdef0")
        );
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_skips_registration_when_registered() {
        let logctx = test_setup_log("test_skips_registration_when_registered");
        let dir = Utf8TempDir::new().unwrap();
        write_registration(dir.path());
        let executor = FakeExecutor::new(logctx.log.clone());
        let daemon = SsmDaemon::new(
            &logctx.log,
            dir.path().to_owned(),
            executor.clone().as_executor(),
            ServiceManager::new().as_service_manager(),
        );

        daemon.configure(&config()).await.unwrap();
        assert!(executor.commands().is_empty());
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_registration_times_out() {
        let logctx = test_setup_log("test_registration_times_out");
        let dir = Utf8TempDir::new().unwrap();
        let executor = FakeExecutor::new(logctx.log.clone());
        let daemon = SsmDaemon::new(
            &logctx.log,
            dir.path().to_owned(),
            executor.clone().as_executor(),
            ServiceManager::new().as_service_manager(),
        )
        .with_registration_timeout(Duration::from_millis(300));

        match daemon.configure(&config()).await.unwrap_err() {
            DaemonError::Other(err) => assert!(matches!(
                err.downcast_ref::<SsmError>(),
                Some(SsmError::RegistrationTimeout(_))
            )),
            err => panic!("unexpected error: {err}"),
        }
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_ensure_running_and_post_launch() {
        let logctx = test_setup_log("test_ensure_running_and_post_launch");
        let dir = Utf8TempDir::new().unwrap();
        let sm = ServiceManager::new();
        let daemon = SsmDaemon::new(
            &logctx.log,
            dir.path().to_owned(),
            FakeExecutor::new(logctx.log.clone()).as_executor(),
            sm.clone().as_service_manager(),
        );

        assert!(daemon.post_launch(&config()).await.is_err());
        write_registration(dir.path());
        daemon.ensure_running().await.unwrap();
        daemon.ensure_running().await.unwrap();
        daemon.post_launch(&config()).await.unwrap();
        assert_eq!(
            sm.calls(),
            vec![
                "enable amazon-ssm-agent",
                "is-active amazon-ssm-agent",
                "start amazon-ssm-agent",
                "enable amazon-ssm-agent",
                "is-active amazon-ssm-agent",
            ]
        );
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_verify_uninstall() {
        let dir = Utf8TempDir::new().unwrap();
        let provider = SsmProvider::new(dir.path().to_owned());
        provider.verify_uninstall("mi-0123456789abcdef0").await.unwrap();

        write_registration(dir.path());
        assert!(matches!(
            provider.verify_uninstall("mi-0123456789abcdef0").await,
            Err(CredentialError::StillRegistered { .. })
        ));
        provider.verify_uninstall("mi-ffffffffffffffff0").await.unwrap();
    }

    #[test]
    fn test_unassigned_registration_is_ignored() {
        let dir = Utf8TempDir::new().unwrap();
        let path = rooted(dir.path(), REGISTRATION_PATH);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"ManagedInstanceID":"","Region":""}"#)
            .unwrap();
        assert_eq!(read_registration(dir.path()).unwrap(), None);

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            read_registration(dir.path()),
            Err(SsmError::ParseRegistration { .. })
        ));
    }
}
