// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Managing systemd units.

use crate::host::{BoxedExecutor, ExecutionError};
use crate::SYSTEMCTL;
use async_trait::async_trait;
use slog::{debug, info, Logger};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::process::Command;

#[derive(thiserror::Error, Debug)]
pub enum ServiceManagerError {
    #[error("Failed to {verb} unit {unit}")]
    Unit {
        verb: &'static str,
        unit: String,
        #[source]
        err: ExecutionError,
    },

    #[error("Failed to reload systemd manager configuration")]
    DaemonReload(#[source] ExecutionError),

    #[error("Service manager connection has already been closed")]
    Closed,
}

/// The operations the bootstrap agent needs from the host's service manager.
///
/// A service manager is opened once per run and closed by the node provider's
/// cleanup hook; calls after [Api::close] fail with
/// [ServiceManagerError::Closed].
#[async_trait]
pub trait Api: Send + Sync {
    /// Re-reads unit files after they've been written.
    async fn daemon_reload(&self) -> Result<(), ServiceManagerError>;

    /// Enables a unit so it starts on boot.
    async fn enable(&self, unit: &str) -> Result<(), ServiceManagerError>;

    /// Starts a unit. Starting an active unit is a no-op.
    async fn start(&self, unit: &str) -> Result<(), ServiceManagerError>;

    /// Restarts a unit, starting it if it was not running.
    async fn restart(&self, unit: &str) -> Result<(), ServiceManagerError>;

    /// Returns true if the unit is currently active.
    async fn is_active(&self, unit: &str) -> Result<bool, ServiceManagerError>;

    /// Releases the connection. Closing twice is harmless.
    fn close(&self) -> Result<(), ServiceManagerError>;
}

pub type BoxedServiceManager = Arc<dyn Api>;

/// A service manager backed by `systemctl`.
pub struct Systemctl {
    log: Logger,
    executor: BoxedExecutor,
    closed: AtomicBool,
}

impl Systemctl {
    pub fn new(log: &Logger, executor: BoxedExecutor) -> Arc<Self> {
        let log = log.new(slog::o!("component" => "Systemctl"));
        debug!(log, "opened service manager");
        Arc::new(Self { log, executor, closed: AtomicBool::new(false) })
    }

    pub fn as_service_manager(self: Arc<Self>) -> BoxedServiceManager {
        self
    }

    fn check_open(&self) -> Result<(), ServiceManagerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ServiceManagerError::Closed);
        }
        Ok(())
    }

    async fn unit_verb(
        &self,
        verb: &'static str,
        unit: &str,
    ) -> Result<(), ServiceManagerError> {
        self.check_open()?;
        info!(self.log, "systemctl {}", verb; "unit" => unit);
        let mut cmd = Command::new(SYSTEMCTL);
        cmd.args([verb, unit]);
        self.executor.execute_async(&mut cmd).await.map_err(|err| {
            ServiceManagerError::Unit { verb, unit: unit.to_string(), err }
        })?;
        Ok(())
    }
}

#[async_trait]
impl Api for Systemctl {
    async fn daemon_reload(&self) -> Result<(), ServiceManagerError> {
        self.check_open()?;
        let mut cmd = Command::new(SYSTEMCTL);
        cmd.arg("daemon-reload");
        self.executor
            .execute_async(&mut cmd)
            .await
            .map_err(ServiceManagerError::DaemonReload)?;
        Ok(())
    }

    async fn enable(&self, unit: &str) -> Result<(), ServiceManagerError> {
        self.unit_verb("enable", unit).await
    }

    async fn start(&self, unit: &str) -> Result<(), ServiceManagerError> {
        self.unit_verb("start", unit).await
    }

    async fn restart(&self, unit: &str) -> Result<(), ServiceManagerError> {
        self.unit_verb("restart", unit).await
    }

    async fn is_active(&self, unit: &str) -> Result<bool, ServiceManagerError> {
        self.check_open()?;
        let mut cmd = Command::new(SYSTEMCTL);
        cmd.args(["is-active", "--quiet", unit]);
        match self.executor.execute_async(&mut cmd).await {
            Ok(_) => Ok(true),
            // `is-active` reports an inactive unit through its exit status.
            Err(ExecutionError::CommandFailure(_)) => Ok(false),
            Err(err) => Err(ServiceManagerError::Unit {
                verb: "query",
                unit: unit.to_string(),
                err,
            }),
        }
    }

    fn close(&self) -> Result<(), ServiceManagerError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(self.log, "closed service manager");
        }
        Ok(())
    }
}
