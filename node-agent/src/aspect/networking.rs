// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::{AspectError, SystemAspect};
use async_trait::async_trait;
use camino::Utf8PathBuf;
use nodeadm_host_utils::fs::{rooted, write_file};
use nodeadm_host_utils::host::BoxedExecutor;
use slog::{info, Logger};
use tokio::process::Command;

const NETWORKCTL: &str = "/usr/bin/networkctl";
const DROP_IN_PATH: &str =
    "/etc/systemd/network/80-ec2.network.d/10-eks_primary_eni_only.conf";

/// Restricts systemd-networkd to the primary interface, leaving secondary
/// interfaces to the pod network.
pub struct Networking {
    log: Logger,
    root: Utf8PathBuf,
    executor: BoxedExecutor,
    primary_mac: String,
}

impl Networking {
    pub const NAME: &'static str = "networking";

    pub fn new(
        log: &Logger,
        root: Utf8PathBuf,
        executor: BoxedExecutor,
        primary_mac: String,
    ) -> Self {
        Self {
            log: log.new(slog::o!("aspect" => Self::NAME)),
            root,
            executor,
            primary_mac,
        }
    }
}

#[async_trait]
impl SystemAspect for Networking {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn setup(&self) -> Result<(), AspectError> {
        let contents =
            format!("[Match]\nPermanentMACAddress={}\n", self.primary_mac);
        let path = rooted(&self.root, DROP_IN_PATH);
        let changed = write_file(&path, contents.as_bytes(), 0o644)?;
        // Reload even when unchanged: an earlier run may have written the
        // drop-in and then failed to reload.
        info!(
            self.log,
            "reloading networkd";
            "path" => %path,
            "changed" => changed,
        );
        let mut cmd = Command::new(NETWORKCTL);
        cmd.arg("reload");
        self.executor.execute_async(&mut cmd).await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use nodeadm_host_utils::host::{
        ExecutionError, FakeExecutor, Output, OutputExt,
    };
    use nodeadm_test_utils::dev::test_setup_log;

    #[tokio::test]
    async fn test_reload_retried_after_failure() {
        let logctx = test_setup_log("test_reload_retried_after_failure");
        let dir = Utf8TempDir::new().unwrap();
        let executor = FakeExecutor::new(logctx.log.clone());
        executor.set_wait_handler(Box::new(|_| Output::failure(1)));
        let aspect = Networking::new(
            &logctx.log,
            dir.path().to_owned(),
            executor.clone().as_executor(),
            "0e:00:00:00:00:01".to_string(),
        );

        assert!(matches!(
            aspect.setup().await,
            Err(AspectError::Command(ExecutionError::CommandFailure(_)))
        ));
        let contents =
            std::fs::read_to_string(rooted(dir.path(), DROP_IN_PATH)).unwrap();
        assert!(contents.contains("PermanentMACAddress=0e:00:00:00:00:01"));

        // The drop-in is already in place; the next run still reloads.
        executor.set_wait_handler(Box::new(|_| Output::success()));
        aspect.setup().await.unwrap();
        assert_eq!(
            executor.commands(),
            vec![format!("{NETWORKCTL} reload"), format!("{NETWORKCTL} reload")]
        );
        logctx.cleanup_successful();
    }
}
