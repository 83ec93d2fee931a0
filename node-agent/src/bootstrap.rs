// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The bootstrap sequence.
//!
//! ```text
//! aspect-setup -> pre-process-daemon -> credential-configuration
//!     -> daemon-configuration -> daemon-run -> cleanup
//! ```
//!
//! Phases run strictly in order and the first failure stops the run. Aspect
//! setup and credential configuration always run; the other phases may be
//! skipped by name. Cleanup runs exactly once, whether or not a phase failed.
//!
//! Nothing is remembered between runs. A second invocation repeats every
//! phase that isn't skipped, relying on each step being idempotent. A failure
//! partway through daemon configuration leaves the daemons configured so far
//! as they are.

use crate::aspect::AspectError;
use crate::provider::{NodeProvider, ProviderError};
use nodeadm_api::{Phase, SkipPhases};
use nodeadm_daemon::DaemonError;
use slog::{info, warn, Logger};

#[derive(thiserror::Error, Debug)]
pub enum BootstrapError {
    #[error("Aspect {aspect} failed to set up")]
    Aspect {
        aspect: &'static str,
        #[source]
        err: AspectError,
    },

    #[error("Pre-process daemon phase failed")]
    PreProcess(#[source] ProviderError),

    #[error("Credential configuration failed")]
    Credentials(#[source] ProviderError),

    #[error("Daemon {daemon} failed to configure")]
    Configure {
        daemon: &'static str,
        #[source]
        err: DaemonError,
    },

    #[error("Daemon {daemon} failed to start")]
    EnsureRunning {
        daemon: &'static str,
        #[source]
        err: DaemonError,
    },

    #[error("Daemon {daemon} failed after launch")]
    PostLaunch {
        daemon: &'static str,
        #[source]
        err: DaemonError,
    },

    #[error("Cleanup failed")]
    Cleanup(#[source] ProviderError),
}

impl BootstrapError {
    /// The phase that failed, or `None` for cleanup.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            BootstrapError::Aspect { .. } => Some(Phase::AspectSetup),
            BootstrapError::PreProcess(_) => Some(Phase::PreProcessDaemon),
            BootstrapError::Credentials(_) => {
                Some(Phase::CredentialConfiguration)
            }
            BootstrapError::Configure { .. } => {
                Some(Phase::DaemonConfiguration)
            }
            BootstrapError::EnsureRunning { .. }
            | BootstrapError::PostLaunch { .. } => Some(Phase::DaemonRun),
            BootstrapError::Cleanup(_) => None,
        }
    }
}

/// Runs every phase not in `skip` against `provider`, then cleans up.
///
/// If a phase fails and cleanup fails too, the phase error is returned and
/// the cleanup error is logged.
pub async fn run(
    provider: &mut dyn NodeProvider,
    skip: &SkipPhases,
) -> Result<(), BootstrapError> {
    let log = provider.log().new(slog::o!("component" => "bootstrap"));
    let result = run_phases(&log, provider, skip).await;
    let cleanup = provider.cleanup().map_err(BootstrapError::Cleanup);
    match (result, cleanup) {
        (Err(err), Err(cleanup_err)) => {
            warn!(
                log,
                "cleanup failed after bootstrap error";
                "error" => %cleanup_err,
            );
            Err(err)
        }
        (Err(err), Ok(())) | (Ok(()), Err(err)) => Err(err),
        (Ok(()), Ok(())) => {
            info!(log, "bootstrap complete");
            Ok(())
        }
    }
}

async fn run_phases(
    log: &Logger,
    provider: &mut dyn NodeProvider,
    skip: &SkipPhases,
) -> Result<(), BootstrapError> {
    info!(log, "running phase"; "phase" => %Phase::AspectSetup);
    for aspect in provider.aspects() {
        info!(log, "setting up aspect"; "aspect" => aspect.name());
        aspect.setup().await.map_err(|err| BootstrapError::Aspect {
            aspect: aspect.name(),
            err,
        })?;
    }

    if skip.contains(Phase::PreProcessDaemon) {
        info!(log, "skipping phase"; "phase" => %Phase::PreProcessDaemon);
    } else {
        info!(log, "running phase"; "phase" => %Phase::PreProcessDaemon);
        provider
            .pre_process_daemon()
            .await
            .map_err(BootstrapError::PreProcess)?;
    }

    info!(log, "running phase"; "phase" => %Phase::CredentialConfiguration);
    let client = provider
        .configure_credentials()
        .await
        .map_err(BootstrapError::Credentials)?;
    info!(
        log,
        "configured API client";
        "credential_provider" => %client.provider,
        "region" => &client.region,
    );

    let daemons = provider.daemons();

    if skip.contains(Phase::DaemonConfiguration) {
        info!(log, "skipping phase"; "phase" => %Phase::DaemonConfiguration);
    } else {
        info!(log, "running phase"; "phase" => %Phase::DaemonConfiguration);
        for daemon in &daemons {
            info!(log, "configuring daemon"; "daemon" => daemon.name());
            daemon.configure(provider.config()).await.map_err(|err| {
                BootstrapError::Configure { daemon: daemon.name(), err }
            })?;
        }
    }

    if skip.contains(Phase::DaemonRun) {
        info!(log, "skipping phase"; "phase" => %Phase::DaemonRun);
    } else {
        info!(log, "running phase"; "phase" => %Phase::DaemonRun);
        for daemon in &daemons {
            info!(log, "ensuring daemon is running"; "daemon" => daemon.name());
            daemon.ensure_running().await.map_err(|err| {
                BootstrapError::EnsureRunning { daemon: daemon.name(), err }
            })?;
            daemon.post_launch(provider.config()).await.map_err(|err| {
                BootstrapError::PostLaunch { daemon: daemon.name(), err }
            })?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::aspect::{BoxedAspect, SystemAspect};
    use async_trait::async_trait;
    use nodeadm_api::{
        ClusterDetails, CredentialProviderKind, HybridOptions, NodeConfig,
        NodeConfigSpec, SsmOptions,
    };
    use nodeadm_credentials::{AwsClientConfig, SsmError};
    use nodeadm_daemon::{BoxedDaemon, Daemon};
    use nodeadm_test_utils::dev::test_setup_log;
    use std::sync::{Arc, Mutex};
    use strum::IntoEnumIterator;
    use test_strategy::proptest;

    type Calls = Arc<Mutex<Vec<String>>>;

    fn push(calls: &Calls, call: String) {
        calls.lock().unwrap().push(call);
    }

    struct FakeAspect {
        calls: Calls,
        fail: bool,
    }

    #[async_trait]
    impl SystemAspect for FakeAspect {
        fn name(&self) -> &'static str {
            "aspect"
        }

        async fn setup(&self) -> Result<(), AspectError> {
            push(&self.calls, "aspect.Setup".to_string());
            if self.fail {
                return Err(AspectError::Command(
                    nodeadm_host_utils::host::ExecutionError::ParseFailure(
                        "no disks".to_string(),
                    ),
                ));
            }
            Ok(())
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum FailAt {
        Never,
        /// Fails the way a registration agent that never receives an id
        /// does.
        Configure,
        EnsureRunning,
        PostLaunch,
    }

    struct FakeDaemon {
        name: &'static str,
        calls: Calls,
        fail_at: FailAt,
    }

    impl FakeDaemon {
        fn new(name: &'static str, calls: &Calls, fail_at: FailAt) -> Self {
            Self { name, calls: calls.clone(), fail_at }
        }

        fn unit_failure(&self) -> DaemonError {
            DaemonError::other(std::io::Error::other(format!(
                "{} exited with status 1",
                self.name
            )))
        }
    }

    #[async_trait]
    impl Daemon for FakeDaemon {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn configure(
            &self,
            config: &NodeConfig,
        ) -> Result<(), DaemonError> {
            push(
                &self.calls,
                format!(
                    "{}.Configure({})",
                    self.name,
                    config.resolved_node_name().unwrap_or("-")
                ),
            );
            if self.fail_at == FailAt::Configure {
                return Err(DaemonError::other(SsmError::RegistrationTimeout(
                    std::time::Duration::from_secs(1),
                )));
            }
            Ok(())
        }

        async fn ensure_running(&self) -> Result<(), DaemonError> {
            push(&self.calls, format!("{}.EnsureRunning", self.name));
            if self.fail_at == FailAt::EnsureRunning {
                return Err(self.unit_failure());
            }
            Ok(())
        }

        async fn post_launch(
            &self,
            _config: &NodeConfig,
        ) -> Result<(), DaemonError> {
            push(&self.calls, format!("{}.PostLaunch", self.name));
            if self.fail_at == FailAt::PostLaunch {
                return Err(self.unit_failure());
            }
            Ok(())
        }
    }

    struct FakeProvider {
        log: Logger,
        config: NodeConfig,
        calls: Calls,
        aspects: Vec<BoxedAspect>,
        daemons: Vec<BoxedDaemon>,
        fail_credentials: bool,
        /// Identity the pre-process hook assigns.
        assigned_name: Option<String>,
    }

    impl FakeProvider {
        fn new(log: &Logger) -> Self {
            let config = NodeConfig::new(NodeConfigSpec {
                cluster: ClusterDetails {
                    region: Some("us-west-2".to_string()),
                    ..Default::default()
                },
                hybrid: Some(HybridOptions {
                    ssm: Some(SsmOptions::default()),
                    ..Default::default()
                }),
                ..Default::default()
            });
            let calls = Calls::default();
            Self {
                log: log.clone(),
                config,
                aspects: vec![Arc::new(FakeAspect {
                    calls: calls.clone(),
                    fail: false,
                })],
                daemons: vec![
                    Arc::new(FakeDaemon::new(
                        "daemon1",
                        &calls,
                        FailAt::Never,
                    )),
                    Arc::new(FakeDaemon::new(
                        "daemon2",
                        &calls,
                        FailAt::Never,
                    )),
                ],
                calls,
                fail_credentials: false,
                assigned_name: None,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NodeProvider for FakeProvider {
        fn log(&self) -> &Logger {
            &self.log
        }

        fn config(&self) -> &NodeConfig {
            &self.config
        }

        fn aspects(&self) -> Vec<BoxedAspect> {
            self.aspects.clone()
        }

        fn daemons(&self) -> Vec<BoxedDaemon> {
            self.daemons.clone()
        }

        async fn pre_process_daemon(&mut self) -> Result<(), ProviderError> {
            push(&self.calls, "PreProcess".to_string());
            if let Some(name) = &self.assigned_name {
                self.config.status.hybrid.node_name = Some(name.clone());
            }
            Ok(())
        }

        async fn configure_credentials(
            &mut self,
        ) -> Result<AwsClientConfig, ProviderError> {
            push(&self.calls, "credential-config".to_string());
            if self.fail_credentials {
                return Err(ProviderError::UnsupportedCredentialProvider {
                    kind: CredentialProviderKind::Ec2InstanceRole,
                    node: "hybrid",
                });
            }
            Ok(AwsClientConfig::for_node(&self.config)?)
        }

        fn cleanup(&mut self) -> Result<(), ProviderError> {
            push(&self.calls, "Cleanup".to_string());
            Ok(())
        }
    }

    fn skip(names: &[&str]) -> SkipPhases {
        SkipPhases::from_names(names).unwrap()
    }

    #[tokio::test]
    async fn test_full_run_call_order() {
        let logctx = test_setup_log("test_full_run_call_order");
        let mut provider = FakeProvider::new(&logctx.log);

        run(&mut provider, &skip(&["pre-process-daemon"])).await.unwrap();
        assert_eq!(
            provider.calls(),
            [
                "aspect.Setup",
                "credential-config",
                "daemon1.Configure(-)",
                "daemon2.Configure(-)",
                "daemon1.EnsureRunning",
                "daemon1.PostLaunch",
                "daemon2.EnsureRunning",
                "daemon2.PostLaunch",
                "Cleanup",
            ]
        );
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_skip_daemon_run() {
        let logctx = test_setup_log("test_skip_daemon_run");
        let mut provider = FakeProvider::new(&logctx.log);

        run(&mut provider, &skip(&["pre-process-daemon", "daemon-run"]))
            .await
            .unwrap();
        assert_eq!(
            provider.calls(),
            [
                "aspect.Setup",
                "credential-config",
                "daemon1.Configure(-)",
                "daemon2.Configure(-)",
                "Cleanup",
            ]
        );
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_registration_timeout_stops_run() {
        let logctx = test_setup_log("test_registration_timeout_stops_run");
        let mut provider = FakeProvider::new(&logctx.log);
        provider.daemons[0] = Arc::new(FakeDaemon::new(
            "ssm",
            &provider.calls,
            FailAt::Configure,
        ));

        let err = run(&mut provider, &SkipPhases::default())
            .await
            .unwrap_err();
        assert!(matches!(
            &err,
            BootstrapError::Configure { daemon: "ssm", .. }
        ));
        assert_eq!(err.phase(), Some(Phase::DaemonConfiguration));
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("No managed-instance id"));
        assert_eq!(
            provider.calls(),
            [
                "aspect.Setup",
                "PreProcess",
                "credential-config",
                "ssm.Configure(-)",
                "Cleanup",
            ]
        );
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_configure_failure_keeps_earlier_daemons() {
        let logctx =
            test_setup_log("test_configure_failure_keeps_earlier_daemons");
        let mut provider = FakeProvider::new(&logctx.log);
        provider.daemons[1] = Arc::new(FakeDaemon::new(
            "daemon2",
            &provider.calls,
            FailAt::Configure,
        ));

        let err = run(&mut provider, &skip(&["pre-process-daemon"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::Configure { daemon: "daemon2", .. }
        ));
        assert_eq!(
            provider.calls(),
            [
                "aspect.Setup",
                "credential-config",
                "daemon1.Configure(-)",
                "daemon2.Configure(-)",
                "Cleanup",
            ]
        );
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_run_failure_stops_later_daemons() {
        let logctx = test_setup_log("test_run_failure_stops_later_daemons");
        let prefix = [
            "aspect.Setup",
            "credential-config",
            "daemon1.Configure(-)",
            "daemon2.Configure(-)",
        ];

        let mut provider = FakeProvider::new(&logctx.log);
        provider.daemons[0] = Arc::new(FakeDaemon::new(
            "daemon1",
            &provider.calls,
            FailAt::EnsureRunning,
        ));
        let err = run(&mut provider, &skip(&["pre-process-daemon"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::EnsureRunning { daemon: "daemon1", .. }
        ));
        assert_eq!(err.phase(), Some(Phase::DaemonRun));
        let mut expected = prefix.to_vec();
        expected.extend(["daemon1.EnsureRunning", "Cleanup"]);
        assert_eq!(provider.calls(), expected);

        let mut provider = FakeProvider::new(&logctx.log);
        provider.daemons[0] = Arc::new(FakeDaemon::new(
            "daemon1",
            &provider.calls,
            FailAt::PostLaunch,
        ));
        let err = run(&mut provider, &skip(&["pre-process-daemon"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::PostLaunch { daemon: "daemon1", .. }
        ));
        let mut expected = prefix.to_vec();
        expected.extend([
            "daemon1.EnsureRunning",
            "daemon1.PostLaunch",
            "Cleanup",
        ]);
        assert_eq!(provider.calls(), expected);
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_cleanup_runs_once_on_early_failures() {
        let logctx = test_setup_log("test_cleanup_runs_once_on_early_failures");

        let mut provider = FakeProvider::new(&logctx.log);
        provider.aspects = vec![Arc::new(FakeAspect {
            calls: provider.calls.clone(),
            fail: true,
        })];
        let err = run(&mut provider, &SkipPhases::default()).await.unwrap_err();
        assert_eq!(err.phase(), Some(Phase::AspectSetup));
        assert_eq!(provider.calls(), ["aspect.Setup", "Cleanup"]);

        let mut provider = FakeProvider::new(&logctx.log);
        provider.fail_credentials = true;
        let err = run(&mut provider, &SkipPhases::default()).await.unwrap_err();
        assert_eq!(err.phase(), Some(Phase::CredentialConfiguration));
        assert_eq!(
            provider.calls(),
            ["aspect.Setup", "PreProcess", "credential-config", "Cleanup"]
        );
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_identity_reaches_later_daemons() {
        let logctx = test_setup_log("test_identity_reaches_later_daemons");
        let mut provider = FakeProvider::new(&logctx.log);
        provider.assigned_name = Some("mi-0123456789abcdef0".to_string());

        run(&mut provider, &skip(&["daemon-run"])).await.unwrap();
        let calls = provider.calls();
        for daemon in ["daemon1", "daemon2"] {
            let call = format!("{daemon}.Configure(mi-0123456789abcdef0)");
            assert!(calls.contains(&call), "missing {call}");
        }
        logctx.cleanup_successful();
    }

    #[proptest]
    fn proptest_skipped_phases_never_run(
        #[strategy(proptest::sample::subsequence(
            Phase::iter().filter(|p| p.is_skippable()).collect::<Vec<_>>(),
            0..=3,
        ))]
        skipped: Vec<Phase>,
    ) {
        let logctx = test_setup_log("proptest_skipped_phases_never_run");
        let skip = SkipPhases::new(skipped.iter().copied()).unwrap();
        let mut provider = FakeProvider::new(&logctx.log);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(run(&mut provider, &skip)).unwrap();

        let calls = provider.calls();
        let ran = |prefix: &str| calls.iter().any(|c| c.contains(prefix));
        assert!(ran("aspect.Setup"));
        assert!(ran("credential-config"));
        assert_eq!(ran("PreProcess"), !skip.contains(Phase::PreProcessDaemon));
        assert_eq!(
            ran(".Configure"),
            !skip.contains(Phase::DaemonConfiguration)
        );
        assert_eq!(ran(".EnsureRunning"), !skip.contains(Phase::DaemonRun));
        assert_eq!(ran(".PostLaunch"), !skip.contains(Phase::DaemonRun));
        assert_eq!(calls.iter().filter(|c| *c == "Cleanup").count(), 1);
        assert_eq!(calls.last().map(String::as_str), Some("Cleanup"));
        logctx.cleanup_successful();
    }
}
