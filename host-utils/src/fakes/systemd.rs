// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::host::{output_to_exec_error, ExecutionError, Output, OutputExt};
use crate::systemd::{Api, BoxedServiceManager, ServiceManagerError};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Inner {
    calls: Vec<String>,
    active: BTreeSet<String>,
    enabled: BTreeSet<String>,
    failing: BTreeSet<String>,
    closed: bool,
    close_count: usize,
}

/// A fake implementation of [crate::systemd::Systemctl].
///
/// This struct implements the [crate::systemd::Api] interface but keeps unit
/// state in memory, recording each call as `"<verb> <unit>"`.
#[derive(Default)]
pub struct ServiceManager {
    inner: Mutex<Inner>,
}

impl ServiceManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn as_service_manager(self: Arc<Self>) -> BoxedServiceManager {
        self
    }

    /// Causes `start` and `restart` of `unit` to fail.
    pub fn fail_unit(&self, unit: &str) {
        self.inner.lock().unwrap().failing.insert(unit.to_string());
    }

    /// Marks a unit as already running.
    pub fn set_active(&self, unit: &str) {
        self.inner.lock().unwrap().active.insert(unit.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn is_enabled(&self, unit: &str) -> bool {
        self.inner.lock().unwrap().enabled.contains(unit)
    }

    pub fn close_count(&self) -> usize {
        self.inner.lock().unwrap().close_count
    }

    fn record(
        &self,
        verb: &'static str,
        unit: &str,
    ) -> Result<std::sync::MutexGuard<'_, Inner>, ServiceManagerError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(ServiceManagerError::Closed);
        }
        inner.calls.push(format!("{verb} {unit}").trim_end().to_string());
        Ok(inner)
    }

    fn run_unit(
        &self,
        verb: &'static str,
        unit: &str,
    ) -> Result<(), ServiceManagerError> {
        let mut inner = self.record(verb, unit)?;
        if inner.failing.contains(unit) {
            return Err(ServiceManagerError::Unit {
                verb,
                unit: unit.to_string(),
                err: unit_failure(verb, unit),
            });
        }
        inner.active.insert(unit.to_string());
        Ok(())
    }
}

fn unit_failure(verb: &str, unit: &str) -> ExecutionError {
    output_to_exec_error(
        format!("systemctl {verb} {unit}"),
        &Output::failure(1)
            .set_stderr(format!("Job for {unit} failed (fake)")),
    )
}

#[async_trait::async_trait]
impl Api for ServiceManager {
    async fn daemon_reload(&self) -> Result<(), ServiceManagerError> {
        self.record("daemon-reload", "").map(|_| ())
    }

    async fn enable(&self, unit: &str) -> Result<(), ServiceManagerError> {
        let mut inner = self.record("enable", unit)?;
        inner.enabled.insert(unit.to_string());
        Ok(())
    }

    async fn start(&self, unit: &str) -> Result<(), ServiceManagerError> {
        self.run_unit("start", unit)
    }

    async fn restart(&self, unit: &str) -> Result<(), ServiceManagerError> {
        self.run_unit("restart", unit)
    }

    async fn is_active(&self, unit: &str) -> Result<bool, ServiceManagerError> {
        let inner = self.record("is-active", unit)?;
        Ok(inner.active.contains(unit))
    }

    fn close(&self) -> Result<(), ServiceManagerError> {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        inner.close_count += 1;
        Ok(())
    }
}
