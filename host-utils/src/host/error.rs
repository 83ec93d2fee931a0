// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#[derive(Debug)]
pub struct CommandFailureInfo {
    pub(crate) command: String,
    pub(crate) status: std::process::ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandFailureInfo {
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn status(&self) -> std::process::ExitStatus {
        self.status
    }
}

impl std::fmt::Display for CommandFailureInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Command [{}] executed and failed with status: {}",
            self.command, self.status
        )?;
        write!(f, "  stdout: {}", self.stdout)?;
        write!(f, "  stderr: {}", self.stderr)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ExecutionError {
    #[error("Failed to start execution of [{command}]: {err}")]
    ExecutionStart { command: String, err: std::io::Error },

    #[error("{0}")]
    CommandFailure(Box<CommandFailureInfo>),

    #[error("Failed to parse command output")]
    ParseFailure(String),
}
