// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::{AspectError, SystemAspect};
use async_trait::async_trait;
use nodeadm_api::LocalStorageStrategy;
use nodeadm_host_utils::host::BoxedExecutor;
use slog::{debug, info, Logger};
use tokio::process::Command;

const SETUP_LOCAL_DISKS: &str = "/usr/bin/setup-local-disks";

/// Lays out instance-store disks according to the configured strategy.
pub struct LocalDisk {
    log: Logger,
    executor: BoxedExecutor,
    strategy: Option<LocalStorageStrategy>,
}

impl LocalDisk {
    pub const NAME: &'static str = "local-disk";

    pub fn new(
        log: &Logger,
        executor: BoxedExecutor,
        strategy: Option<LocalStorageStrategy>,
    ) -> Self {
        Self {
            log: log.new(slog::o!("aspect" => Self::NAME)),
            executor,
            strategy,
        }
    }
}

#[async_trait]
impl SystemAspect for LocalDisk {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn setup(&self) -> Result<(), AspectError> {
        let Some(strategy) = self.strategy else {
            debug!(self.log, "no local storage strategy configured");
            return Ok(());
        };
        info!(self.log, "setting up local disks"; "strategy" => %strategy);
        let mut cmd = Command::new(SETUP_LOCAL_DISKS);
        cmd.arg(strategy.to_string());
        self.executor.execute_async(&mut cmd).await?;
        Ok(())
    }
}
