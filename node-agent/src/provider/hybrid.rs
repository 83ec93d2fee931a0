// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Nodes joining the cluster from outside the cloud provider's network.

use super::{
    sandbox_image, DaemonFilter, HostEnv, NodeProvider, ProviderError,
    ProviderOptions,
};
use crate::aspect::BoxedAspect;
use async_trait::async_trait;
use nodeadm_api::{validate, ConfigOrigin, CredentialProviderKind, NodeConfig};
use nodeadm_credentials::ssm::{self, read_registration, SsmDaemon};
use nodeadm_credentials::{
    configure_client, AwsClientConfig, BoxedCredentialProvider,
    CredentialError, IamRolesAnywhereProvider, NodeSpec, SsmError,
    SsmProvider,
};
use nodeadm_daemon::{BoxedDaemon, Containerd, Daemon, Kubelet};
use slog::{info, Logger};
use std::sync::Arc;

pub struct HybridNodeProvider {
    log: Logger,
    env: HostEnv,
    config: NodeConfig,
    node_spec: NodeSpec,
    credential_provider: BoxedCredentialProvider,
    /// Present only for the registration strategy; also first in `daemons`.
    ssm_daemon: Option<Arc<SsmDaemon>>,
    daemons: Vec<BoxedDaemon>,
    daemon_filter: DaemonFilter,
    aws_client: Option<AwsClientConfig>,
}

impl HybridNodeProvider {
    pub fn new(
        log: &Logger,
        env: HostEnv,
        mut config: NodeConfig,
        origin: ConfigOrigin,
        options: ProviderOptions,
    ) -> Result<Self, ProviderError> {
        validate(&config, origin)?;
        let log = log.new(slog::o!("component" => "HybridNodeProvider"));
        let kind = config.credential_provider_kind();

        let credential_provider: BoxedCredentialProvider = match kind {
            CredentialProviderKind::Ssm => {
                Arc::new(SsmProvider::new(env.root.clone()))
            }
            CredentialProviderKind::IamRolesAnywhere => {
                let ira = config
                    .spec
                    .hybrid
                    .as_ref()
                    .and_then(|hybrid| hybrid.iam_roles_anywhere.clone())
                    .ok_or(CredentialError::MissingOptions(kind))?;
                Arc::new(IamRolesAnywhereProvider::new(env.root.clone(), ira))
            }
            CredentialProviderKind::Ec2InstanceRole => {
                return Err(ProviderError::UnsupportedCredentialProvider {
                    kind,
                    node: "hybrid",
                });
            }
        };

        // Every other daemon is configured with the identity the agent
        // produces, so the agent always goes first.
        let mut daemons: Vec<BoxedDaemon> = Vec::new();
        let ssm_daemon = if kind.requires_agent() {
            let mut daemon = SsmDaemon::new(
                &log,
                env.root.clone(),
                env.executor.clone(),
                env.service_manager.clone(),
            );
            if let Some(timeout) = options.registration_timeout {
                daemon = daemon.with_registration_timeout(timeout);
            }
            let daemon = Arc::new(daemon);
            daemons.push(daemon.clone());
            Some(daemon)
        } else {
            None
        };
        daemons.push(Arc::new(Containerd::new(
            &log,
            env.root.clone(),
            env.service_manager.clone(),
        )));
        daemons.push(Arc::new(Kubelet::new(
            &log,
            env.root.clone(),
            env.service_manager.clone(),
        )));

        let known: Vec<&'static str> =
            daemons.iter().map(|d| d.name()).collect();
        let daemon_filter = DaemonFilter::new(&options.daemon_filter, &known)?;

        Self::enrich(&log, &env, &mut config)?;
        let mut node_spec = NodeSpec::new(
            &config,
            &options.os,
            options.certificate_authority,
        );
        let hybrid = credential_provider.nodeadm_config(&node_spec)?;
        node_spec.hybrid = hybrid.clone();
        config.spec.hybrid = Some(hybrid);
        info!(
            log,
            "hybrid node provider ready";
            "credential_provider" => %kind,
            "daemons" => ?known,
        );
        Ok(Self {
            log,
            env,
            config,
            node_spec,
            credential_provider,
            ssm_daemon,
            daemons,
            daemon_filter,
            aws_client: None,
        })
    }

    /// Fills in what can be derived without touching the network.
    fn enrich(
        log: &Logger,
        env: &HostEnv,
        config: &mut NodeConfig,
    ) -> Result<(), ProviderError> {
        if let Some(region) = config.spec.cluster.region.clone() {
            config.status.defaults.sandbox_image = Some(sandbox_image(&region));
        }
        let hybrid = config.spec.hybrid.clone().unwrap_or_default();
        if let Some(ira) = &hybrid.iam_roles_anywhere {
            config.status.hybrid.node_name = Some(ira.node_name.clone());
        } else if let Some(registration) = read_registration(&env.root)? {
            // A re-run on a node that already registered.
            info!(
                log,
                "found existing registration";
                "managed_instance_id" => &registration.managed_instance_id,
            );
            config.status.hybrid.node_name =
                Some(registration.managed_instance_id);
        }
        Ok(())
    }

    /// The API client resolved by credential configuration, once it ran.
    pub fn aws_client(&self) -> Option<&AwsClientConfig> {
        self.aws_client.as_ref()
    }
}

#[async_trait]
impl NodeProvider for HybridNodeProvider {
    fn log(&self) -> &Logger {
        &self.log
    }

    fn config(&self) -> &NodeConfig {
        &self.config
    }

    fn aspects(&self) -> Vec<BoxedAspect> {
        Vec::new()
    }

    fn daemons(&self) -> Vec<BoxedDaemon> {
        self.daemon_filter.apply(&self.daemons)
    }

    async fn pre_process_daemon(&mut self) -> Result<(), ProviderError> {
        let Some(daemon) = self.ssm_daemon.clone() else {
            return Ok(());
        };
        if !self.daemon_filter.allows(ssm::NAME) {
            return Ok(());
        }
        let wrap = |err| ProviderError::Daemon { daemon: ssm::NAME, err };
        daemon.configure(&self.config).await.map_err(wrap)?;
        daemon.ensure_running().await.map_err(wrap)?;
        daemon.post_launch(&self.config).await.map_err(wrap)?;

        let id = daemon.managed_instance_id()?.ok_or(SsmError::NotRegistered)?;
        info!(
            self.log,
            "using managed-instance id as node name";
            "node_name" => &id,
        );
        self.config.status.hybrid.node_name = Some(id);
        Ok(())
    }

    async fn configure_credentials(
        &mut self,
    ) -> Result<AwsClientConfig, ProviderError> {
        let client = configure_client(
            &self.log,
            &self.env.root,
            &self.config,
            self.credential_provider.as_ref(),
            &self.node_spec,
        )?;
        self.aws_client = Some(client.clone());
        Ok(client)
    }

    fn cleanup(&mut self) -> Result<(), ProviderError> {
        self.env.service_manager.close()?;
        Ok(())
    }
}
