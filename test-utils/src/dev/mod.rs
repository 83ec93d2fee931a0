// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Facilities intended for development tools and the test suite.

use camino::{Utf8Path, Utf8PathBuf};
use slog::{o, Drain, Logger};

/// A logger for a single test, writing to a file that outlives a failing
/// test so its output can be inspected.
pub struct LogContext {
    pub log: Logger,
    log_dir: Utf8PathBuf,
    log_path: Utf8PathBuf,
}

impl LogContext {
    fn new(test_name: &str) -> LogContext {
        let log_dir = camino_tempfile::Builder::new()
            .prefix(&format!("{test_name}."))
            .tempdir()
            .expect("failed to create test log directory")
            .into_path();
        let log_path = log_dir.join(format!("{test_name}.log"));
        let file = std::fs::File::create(&log_path)
            .expect("failed to create test log file");

        let decorator = slog_term::PlainSyncDecorator::new(file);
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        let log = Logger::root(drain, o!("test_name" => test_name.to_string()));
        LogContext { log, log_dir, log_path }
    }

    pub fn log_path(&self) -> &Utf8Path {
        &self.log_path
    }

    /// Removes the log file. Call this at the end of a test that passed.
    pub fn cleanup_successful(self) {
        let _ = std::fs::remove_dir_all(&self.log_dir);
    }
}

/// Set up a [`LogContext`] appropriate for a test named `test_name`
pub fn test_setup_log(test_name: &str) -> LogContext {
    let logctx = LogContext::new(test_name);
    eprintln!("log file: {}", logctx.log_path());
    logctx
}
