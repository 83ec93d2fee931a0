// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The container runtime.

use crate::unit::Unit;
use crate::{Daemon, DaemonError};
use async_trait::async_trait;
use camino::Utf8PathBuf;
use nodeadm_api::NodeConfig;
use nodeadm_host_utils::fs::{remove_file_if_exists, rooted, write_file};
use nodeadm_host_utils::systemd::BoxedServiceManager;
use slog::{debug, Logger};

pub const NAME: &str = "containerd";

const CONFIG_PATH: &str = "/etc/containerd/config.toml";
const DROP_IN_DIR: &str = "/etc/containerd/config.d";
const USER_DROP_IN_PATH: &str = "/etc/containerd/config.d/00-nodeadm.toml";

fn render_config(sandbox_image: &str) -> String {
    format!(
        r#"version = 2
root = "/var/lib/containerd"
state = "/run/containerd"
imports = ["{DROP_IN_DIR}/*.toml"]

[grpc]
address = "/run/containerd/containerd.sock"

[plugins."io.containerd.grpc.v1.cri"]
sandbox_image = "{sandbox_image}"

[plugins."io.containerd.grpc.v1.cri".containerd]
default_runtime_name = "runc"
discard_unpacked_layers = true

[plugins."io.containerd.grpc.v1.cri".containerd.runtimes.runc]
runtime_type = "io.containerd.runc.v2"

[plugins."io.containerd.grpc.v1.cri".containerd.runtimes.runc.options]
SystemdCgroup = true

[plugins."io.containerd.grpc.v1.cri".cni]
bin_dir = "/opt/cni/bin"
conf_dir = "/etc/cni/net.d"
"#
    )
}

pub struct Containerd {
    log: Logger,
    root: Utf8PathBuf,
    unit: Unit,
}

impl Containerd {
    /// `root` is prefixed to every path written; `/` on a real host.
    pub fn new(
        log: &Logger,
        root: Utf8PathBuf,
        service_manager: BoxedServiceManager,
    ) -> Self {
        let unit = Unit::new(NAME, &root, service_manager);
        Self { log: log.new(slog::o!("daemon" => NAME)), root, unit }
    }
}

#[async_trait]
impl Daemon for Containerd {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn configure(&self, config: &NodeConfig) -> Result<(), DaemonError> {
        let sandbox_image = config
            .status
            .defaults
            .sandbox_image
            .as_deref()
            .ok_or(DaemonError::MissingSandboxImage)?;

        let path = rooted(&self.root, CONFIG_PATH);
        let mut changed =
            write_file(&path, render_config(sandbox_image).as_bytes(), 0o644)?;
        debug!(self.log, "wrote containerd config"; "path" => %path);

        let drop_in = rooted(&self.root, USER_DROP_IN_PATH);
        match &config.spec.containerd.config {
            Some(fragment) => {
                changed |= write_file(&drop_in, fragment.as_bytes(), 0o644)?;
            }
            None => remove_file_if_exists(&drop_in)?,
        }

        if changed {
            self.unit.mark_changed()?;
        }
        Ok(())
    }

    async fn ensure_running(&self) -> Result<(), DaemonError> {
        self.unit.ensure_running(&self.log).await
    }

    async fn post_launch(
        &self,
        _config: &NodeConfig,
    ) -> Result<(), DaemonError> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::unit::RESTART_MARKER_DIR;
    use camino_tempfile::Utf8TempDir;
    use nodeadm_api::NodeConfigSpec;
    use nodeadm_host_utils::fakes::systemd::ServiceManager;
    use nodeadm_test_utils::dev::test_setup_log;

    fn config() -> NodeConfig {
        let mut config = NodeConfig::new(NodeConfigSpec::default());
        config.status.defaults.sandbox_image = Some(
            "602401143452.dkr.ecr.us-west-2.amazonaws.com/eks/pause:3.5"
                .to_string(),
        );
        config
    }

    #[tokio::test]
    async fn test_configure_is_idempotent() {
        let logctx = test_setup_log("test_configure_is_idempotent");
        let dir = Utf8TempDir::new().unwrap();
        let sm = ServiceManager::new();
        let containerd = Containerd::new(
            &logctx.log,
            dir.path().to_owned(),
            sm.clone().as_service_manager(),
        );

        let mut config = config();
        config.spec.containerd.config =
            Some("[plugins.\"io.containerd.grpc.v1.cri\"]\n".to_string());
        containerd.configure(&config).await.unwrap();
        let path = dir.path().join("etc/containerd/config.toml");
        let first = std::fs::read_to_string(&path).unwrap();
        assert!(first.contains("eks/pause:3.5"));

        containerd.configure(&config).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), first);
        let drop_in = rooted(dir.path(), USER_DROP_IN_PATH);
        assert!(drop_in.exists());

        config.spec.containerd.config = None;
        containerd.configure(&config).await.unwrap();
        assert!(!drop_in.exists());
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_missing_sandbox_image() {
        let logctx = test_setup_log("test_missing_sandbox_image");
        let dir = Utf8TempDir::new().unwrap();
        let containerd = Containerd::new(
            &logctx.log,
            dir.path().to_owned(),
            ServiceManager::new().as_service_manager(),
        );
        let config = NodeConfig::new(NodeConfigSpec::default());
        assert!(matches!(
            containerd.configure(&config).await,
            Err(DaemonError::MissingSandboxImage)
        ));
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_restarts_only_after_config_change() {
        let logctx = test_setup_log("test_restarts_only_after_config_change");
        let dir = Utf8TempDir::new().unwrap();
        let sm = ServiceManager::new();
        sm.set_active(NAME);
        let containerd = Containerd::new(
            &logctx.log,
            dir.path().to_owned(),
            sm.clone().as_service_manager(),
        );

        containerd.configure(&config()).await.unwrap();
        containerd.ensure_running().await.unwrap();
        containerd.configure(&config()).await.unwrap();
        containerd.ensure_running().await.unwrap();

        assert_eq!(
            sm.calls(),
            vec![
                "daemon-reload",
                "enable containerd",
                "is-active containerd",
                "restart containerd",
                "daemon-reload",
                "enable containerd",
                "start containerd",
            ]
        );
        assert!(sm.is_enabled(NAME));
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_pending_restart_survives_across_runs() {
        let logctx =
            test_setup_log("test_pending_restart_survives_across_runs");
        let dir = Utf8TempDir::new().unwrap();
        let sm = ServiceManager::new();
        sm.set_active(NAME);
        let new_containerd = || {
            Containerd::new(
                &logctx.log,
                dir.path().to_owned(),
                sm.clone().as_service_manager(),
            )
        };

        new_containerd().configure(&config()).await.unwrap();

        // A later run writes new configuration but skips the run phase.
        let mut updated = config();
        updated.status.defaults.sandbox_image = Some(
            "602401143452.dkr.ecr.us-west-2.amazonaws.com/eks/pause:3.9"
                .to_string(),
        );
        new_containerd().configure(&updated).await.unwrap();

        // The run after that sees unchanged files but still restarts.
        let containerd = new_containerd();
        containerd.configure(&updated).await.unwrap();
        containerd.ensure_running().await.unwrap();
        assert_eq!(
            sm.calls(),
            vec![
                "daemon-reload",
                "enable containerd",
                "is-active containerd",
                "restart containerd",
            ]
        );
        assert!(!rooted(dir.path(), RESTART_MARKER_DIR).join(NAME).exists());
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_failed_restart_is_retried() {
        let logctx = test_setup_log("test_failed_restart_is_retried");
        let dir = Utf8TempDir::new().unwrap();
        let sm = ServiceManager::new();
        sm.set_active(NAME);
        sm.fail_unit(NAME);
        let containerd = Containerd::new(
            &logctx.log,
            dir.path().to_owned(),
            sm.clone().as_service_manager(),
        );

        containerd.configure(&config()).await.unwrap();
        containerd.ensure_running().await.unwrap_err();
        let marker = rooted(dir.path(), RESTART_MARKER_DIR).join(NAME);
        assert!(marker.exists());

        let sm = ServiceManager::new();
        sm.set_active(NAME);
        let containerd = Containerd::new(
            &logctx.log,
            dir.path().to_owned(),
            sm.clone().as_service_manager(),
        );
        containerd.configure(&config()).await.unwrap();
        containerd.ensure_running().await.unwrap();
        assert!(sm.calls().contains(&"restart containerd".to_string()));
        assert!(!marker.exists());
        logctx.cleanup_successful();
    }
}
