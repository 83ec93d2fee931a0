// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Nodes running on cloud instances, using the instance role.

use super::{
    sandbox_image, DaemonFilter, HostEnv, NodeProvider, ProviderError,
    ProviderOptions,
};
use crate::aspect::{BoxedAspect, LocalDisk, Networking};
use crate::imds::{instance_details, InstanceMetadata};
use async_trait::async_trait;
use nodeadm_api::{validate, ConfigOrigin, NodeConfig};
use nodeadm_credentials::AwsClientConfig;
use nodeadm_daemon::{BoxedDaemon, Containerd, Kubelet};
use slog::{info, Logger};
use std::sync::Arc;

pub struct Ec2NodeProvider {
    log: Logger,
    env: HostEnv,
    config: NodeConfig,
    aspects: Vec<BoxedAspect>,
    daemons: Vec<BoxedDaemon>,
    daemon_filter: DaemonFilter,
}

impl Ec2NodeProvider {
    pub async fn new(
        log: &Logger,
        env: HostEnv,
        mut config: NodeConfig,
        origin: ConfigOrigin,
        imds: &dyn InstanceMetadata,
        options: ProviderOptions,
    ) -> Result<Self, ProviderError> {
        validate(&config, origin)?;
        let kind = config.credential_provider_kind();
        if !kind.is_cloud_only() {
            return Err(ProviderError::UnsupportedCredentialProvider {
                kind,
                node: "EC2",
            });
        }
        let log = log.new(slog::o!("component" => "Ec2NodeProvider"));

        let details = instance_details(imds).await?;
        info!(
            log,
            "described instance";
            "instance_id" => &details.id,
            "instance_type" => &details.instance_type,
            "region" => &details.region,
        );
        let region = config
            .spec
            .cluster
            .region
            .clone()
            .unwrap_or_else(|| details.region.clone());
        config.status.defaults.sandbox_image = Some(sandbox_image(&region));

        let aspects: Vec<BoxedAspect> = vec![
            Arc::new(LocalDisk::new(
                &log,
                env.executor.clone(),
                config
                    .spec
                    .instance
                    .as_ref()
                    .and_then(|instance| instance.local_storage.as_ref())
                    .map(|storage| storage.strategy),
            )),
            Arc::new(Networking::new(
                &log,
                env.root.clone(),
                env.executor.clone(),
                details.mac.clone(),
            )),
        ];
        config.status.instance = Some(details);

        let daemons: Vec<BoxedDaemon> = vec![
            Arc::new(Containerd::new(
                &log,
                env.root.clone(),
                env.service_manager.clone(),
            )),
            Arc::new(Kubelet::new(
                &log,
                env.root.clone(),
                env.service_manager.clone(),
            )),
        ];
        let known: Vec<&'static str> =
            daemons.iter().map(|d| d.name()).collect();
        let daemon_filter = DaemonFilter::new(&options.daemon_filter, &known)?;

        Ok(Self { log, env, config, aspects, daemons, daemon_filter })
    }
}

#[async_trait]
impl NodeProvider for Ec2NodeProvider {
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
        self.daemon_filter.apply(&self.daemons)
    }

    async fn pre_process_daemon(&mut self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn configure_credentials(
        &mut self,
    ) -> Result<AwsClientConfig, ProviderError> {
        // The instance role needs no files.
        Ok(AwsClientConfig::for_node(&self.config)?)
    }

    fn cleanup(&mut self) -> Result<(), ProviderError> {
        self.env.service_manager.close()?;
        Ok(())
    }
}
