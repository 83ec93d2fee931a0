// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Running commands on the host, or pretending to.

mod error;
mod executor;
mod output;

pub use error::{CommandFailureInfo, ExecutionError};
pub use executor::{
    command_to_string, BoxedExecutor, BoxedWaitFn, Executor, FakeExecutor,
    HostExecutor, WaitFn,
};
pub use output::{output_to_exec_error, Output, OutputExt};
