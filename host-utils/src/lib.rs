// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wrappers around host commands used while bootstrapping a node.

pub mod fakes;
pub mod fs;
pub mod host;
pub mod systemd;

pub use host::{
    BoxedExecutor, CommandFailureInfo, ExecutionError, Executor,
    FakeExecutor, HostExecutor, OutputExt,
};

pub const SYSTEMCTL: &str = "/usr/bin/systemctl";
