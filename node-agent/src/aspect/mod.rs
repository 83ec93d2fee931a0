// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host-level setup steps that don't depend on cluster identity.

use async_trait::async_trait;
use nodeadm_host_utils::fs::WriteFileError;
use nodeadm_host_utils::host::ExecutionError;
use std::sync::Arc;

mod local_disk;
mod networking;

pub use local_disk::LocalDisk;
pub use networking::Networking;

#[derive(thiserror::Error, Debug)]
pub enum AspectError {
    #[error(transparent)]
    Command(#[from] ExecutionError),

    #[error(transparent)]
    WriteFile(#[from] WriteFileError),
}

/// A named, idempotent host setup step.
#[async_trait]
pub trait SystemAspect: Send + Sync {
    fn name(&self) -> &'static str;

    async fn setup(&self) -> Result<(), AspectError>;
}

pub type BoxedAspect = Arc<dyn SystemAspect>;
