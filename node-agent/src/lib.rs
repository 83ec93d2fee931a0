// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Turns a freshly provisioned machine into a Kubernetes worker node.
//!
//! A [provider::NodeProvider] loads, validates and enriches the node
//! configuration and decides which [aspect::SystemAspect]s and daemons the
//! node needs. [bootstrap::run] then drives them through a fixed sequence of
//! phases.

pub mod aspect;
pub mod bootstrap;
pub mod config_source;
pub mod dispatch;
pub mod imds;
pub mod provider;
