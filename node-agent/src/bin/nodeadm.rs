// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Executable program to bootstrap a node

use clap::Parser;
use nodeadm::dispatch::NodeadmApp;
use nodeadm_common::cmd::fatal;

#[tokio::main]
async fn main() {
    let app = NodeadmApp::parse();
    let log = NodeadmApp::setup_log();
    if let Err(message) = app.exec(&log).await {
        fatal(message);
    }
}
