// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Types describing the node a bootstrap run should produce.
//!
//! [NodeConfig] is the one document every other crate in the workspace
//! consumes: the node providers build and enrich it, the credential providers
//! fill in its authentication section, and daemons render their on-disk
//! configuration from it.

mod credentials;
mod node_config;
mod phase;
mod validation;

pub use credentials::CredentialProviderKind;
pub use node_config::*;
pub use phase::{Phase, SkipPhaseError, SkipPhases};
pub use validation::{
    is_valid_node_name, validate, ConfigOrigin, ValidationError,
};
