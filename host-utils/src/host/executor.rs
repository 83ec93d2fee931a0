// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::error::ExecutionError;
use super::output::{output_to_exec_error, Output, OutputExt};

use async_trait::async_trait;
use itertools::Itertools;
use slog::{debug, error, info, Logger};
use std::process::Command;
use std::str::from_utf8;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Renders a command (program and arguments) as a single line.
pub fn command_to_string(command: &Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(|s| s.to_string_lossy())
        .join(" ")
}

fn log_input(log: &Logger, id: u64, command: &Command) {
    info!(
        log,
        "running command via executor";
        "id" => id,
        "command" => command_to_string(command),
    );
}

fn log_output(log: &Logger, id: u64, output: &Output) {
    info!(
        log,
        "finished running command via executor";
        "id" => id,
        "result" => if output.status.success() { "OK" } else { "ERROR" },
        "status" => output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none".to_string()),
    );
    if !output.stdout.is_empty() {
        debug!(
            log,
            "finished command stdout";
            "id" => id,
            "stdout" => from_utf8(&output.stdout).unwrap_or("<Not valid UTF-8>"),
        );
    }
    if !output.stderr.is_empty() {
        debug!(
            log,
            "finished command stderr";
            "id" => id,
            "stderr" => from_utf8(&output.stderr).unwrap_or("<Not valid UTF-8>"),
        );
    }
}

/// Describes the commonly-used "safe-to-reference" type describing the
/// Executor as a trait object.
pub type BoxedExecutor = Arc<dyn Executor>;

/// Describes an "executor", which can run [Command]s and return a response.
///
/// - In production, this is usually simply a [HostExecutor].
/// - Under test, a [FakeExecutor] may be used.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Executes a task, waiting for it to complete, and returning output.
    ///
    /// A non-zero exit status is reported as
    /// [ExecutionError::CommandFailure].
    async fn execute_async(
        &self,
        command: &mut tokio::process::Command,
    ) -> Result<Output, ExecutionError>;
}

/// Handler called when a fake command "runs".
pub type WaitFn = dyn FnMut(&Command) -> Output + Send;
pub type BoxedWaitFn = Box<WaitFn>;

/// An executor which records its inputs and responds with caller-chosen
/// outputs.
pub struct FakeExecutor {
    log: Logger,
    counter: AtomicU64,
    wait_handler: Mutex<BoxedWaitFn>,
    commands: Mutex<Vec<String>>,
}

impl FakeExecutor {
    pub fn new(log: Logger) -> Arc<FakeExecutor> {
        Arc::new(Self {
            log,
            counter: AtomicU64::new(0),
            wait_handler: Mutex::new(Box::new(|_cmd| Output::success())),
            commands: Mutex::new(Vec::new()),
        })
    }

    /// Set the request handler to an arbitrary function.
    pub fn set_wait_handler(&self, f: BoxedWaitFn) {
        *self.wait_handler.lock().unwrap() = f;
    }

    /// Every command run so far, rendered by [command_to_string].
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// Perform some type coercion to access a commonly-used trait object.
    pub fn as_executor(self: Arc<Self>) -> BoxedExecutor {
        self
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    // NOTE: We aren't actually performing any async operations -- it's up to
    // the caller to control the (synchronous) handler.
    async fn execute_async(
        &self,
        command: &mut tokio::process::Command,
    ) -> Result<Output, ExecutionError> {
        let command = command.as_std();
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        log_input(&self.log, id, command);
        let command_str = command_to_string(command);
        self.commands.lock().unwrap().push(command_str.clone());

        let output = self.wait_handler.lock().unwrap()(command);
        log_output(&self.log, id, &output);

        if !output.status.success() {
            return Err(output_to_exec_error(command_str, &output));
        }
        Ok(output)
    }
}

pub struct HostExecutor {
    log: Logger,
    counter: AtomicU64,
}

impl HostExecutor {
    pub fn new(log: Logger) -> Arc<Self> {
        Arc::new(Self { log, counter: AtomicU64::new(0) })
    }

    pub fn as_executor(self: Arc<Self>) -> BoxedExecutor {
        self
    }
}

#[async_trait]
impl Executor for HostExecutor {
    async fn execute_async(
        &self,
        command: &mut tokio::process::Command,
    ) -> Result<Output, ExecutionError> {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        log_input(&self.log, id, command.as_std());
        let output = command.output().await.map_err(|err| {
            error!(
                self.log,
                "could not start program";
                "id" => id,
                "error" => %err,
            );
            ExecutionError::ExecutionStart {
                command: command_to_string(command.as_std()),
                err,
            }
        })?;
        log_output(&self.log, id, &output);
        if !output.status.success() {
            return Err(output_to_exec_error(
                command_to_string(command.as_std()),
                &output,
            ));
        }
        Ok(output)
    }
}
