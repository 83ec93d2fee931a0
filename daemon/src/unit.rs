// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::DaemonError;
use camino::{Utf8Path, Utf8PathBuf};
use nodeadm_host_utils::fs::{remove_file_if_exists, rooted, write_file};
use nodeadm_host_utils::systemd::BoxedServiceManager;
use slog::{info, Logger};

/// Directory holding one marker per unit whose configuration changed since
/// the unit last (re)started.
pub(crate) const RESTART_MARKER_DIR: &str = "/var/lib/nodeadm/restart-pending";

/// The systemd unit backing a daemon.
///
/// A configuration change is recorded on disk rather than in memory, so a
/// unit still gets restarted by a later run if this one stopped (or skipped
/// the run phase) between writing the configuration and restarting.
pub(crate) struct Unit {
    name: &'static str,
    marker: Utf8PathBuf,
    service_manager: BoxedServiceManager,
}

impl Unit {
    pub fn new(
        name: &'static str,
        root: &Utf8Path,
        service_manager: BoxedServiceManager,
    ) -> Self {
        let marker = rooted(root, RESTART_MARKER_DIR).join(name);
        Self { name, marker, service_manager }
    }

    pub fn mark_changed(&self) -> Result<(), DaemonError> {
        write_file(&self.marker, b"", 0o644)?;
        Ok(())
    }

    pub fn restart_pending(&self) -> bool {
        self.marker.exists()
    }

    pub async fn ensure_running(
        &self,
        log: &Logger,
    ) -> Result<(), DaemonError> {
        let sm = &self.service_manager;
        sm.daemon_reload().await?;
        sm.enable(self.name).await?;
        if self.restart_pending() && sm.is_active(self.name).await? {
            info!(
                log,
                "restarting with new configuration";
                "unit" => self.name,
            );
            sm.restart(self.name).await?;
        } else {
            sm.start(self.name).await?;
        }
        // Only a unit that came up on the current configuration clears it.
        remove_file_if_exists(&self.marker)?;
        Ok(())
    }
}
