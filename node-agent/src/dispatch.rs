// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `nodeadm` command line.

use crate::bootstrap::{self, BootstrapError};
use crate::config_source::{ConfigSource, ConfigSourceError};
use crate::imds::{ImdsClient, DEFAULT_ENDPOINT};
use crate::provider::{self, HostEnv, ProviderError, ProviderOptions};
use anyhow::Context;
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use nodeadm_api::SkipPhases;
use nodeadm_common::cmd::CmdError;
use nodeadm_common::FileKv;
use nodeadm_credentials::CertificateAuthority;
use nodeadm_host_utils::host::HostExecutor;
use nodeadm_host_utils::systemd::Systemctl;
use slog::{info, Drain};

/// Node bootstrap agent.
#[derive(Debug, Parser)]
#[command(name = "nodeadm", version)]
pub struct NodeadmApp {
    #[clap(subcommand)]
    subcommand: NodeadmCommand,
}

impl NodeadmApp {
    /// Executes the app.
    pub async fn exec(self, log: &slog::Logger) -> Result<(), CmdError> {
        match self.subcommand {
            NodeadmCommand::Init(opts) => opts.exec(log).await,
        }
    }

    pub fn setup_log() -> slog::Logger {
        let drain = stderr_env_drain("RUST_LOG");
        let drain = slog_async::Async::new(drain).build().fuse();
        slog::Logger::root(drain, slog::o!(FileKv))
    }
}

#[derive(Debug, Subcommand)]
enum NodeadmCommand {
    /// Bootstrap this machine into a cluster node.
    Init(InitOpts),
}

#[derive(Debug, Args)]
struct InitOpts {
    /// Where to read the node configuration: a path, `file://<path>` or
    /// `imds://user-data`
    #[clap(long, short = 'c', default_value = "imds://user-data")]
    config_source: String,

    /// Phases to skip, comma-separated
    #[clap(long, short = 's', value_delimiter = ',')]
    skip: Vec<String>,

    /// Only manage these daemons, comma-separated
    #[clap(long, short = 'd', value_delimiter = ',')]
    daemon: Vec<String>,

    /// CA certificate that signs node certificates
    #[clap(long, requires = "certificate_authority_key")]
    certificate_authority_cert: Option<Utf8PathBuf>,

    /// Private key of the CA that signs node certificates
    #[clap(long, requires = "certificate_authority_cert")]
    certificate_authority_key: Option<Utf8PathBuf>,

    /// Operating system name recorded in node certificates
    #[clap(long, default_value = "linux")]
    os: String,

    /// Prefix for every host path written
    #[clap(long, default_value = "/", hide = true)]
    root: Utf8PathBuf,

    #[clap(long, default_value = DEFAULT_ENDPOINT, hide = true)]
    imds_endpoint: String,
}

impl InitOpts {
    async fn exec(self, log: &slog::Logger) -> Result<(), CmdError> {
        let skip = SkipPhases::from_names(&self.skip)
            .map_err(|err| CmdError::Usage(err.to_string()))?;
        let source: ConfigSource =
            self.config_source.parse().map_err(|err: ConfigSourceError| {
                CmdError::Usage(err.to_string())
            })?;

        let certificate_authority = match (
            &self.certificate_authority_cert,
            &self.certificate_authority_key,
        ) {
            (Some(cert), Some(key)) => Some(
                CertificateAuthority::load(cert, key)
                    .context("loading certificate authority")
                    .map_err(CmdError::Failure)?,
            ),
            _ => None,
        };

        info!(
            log,
            "bootstrapping node";
            "config_source" => %source,
            "skip" => ?skip,
        );

        let executor = HostExecutor::new(log.clone()).as_executor();
        let service_manager =
            Systemctl::new(log, executor.clone()).as_service_manager();
        let env = HostEnv { root: self.root, executor, service_manager };
        let imds = ImdsClient::new(log, &self.imds_endpoint);
        let options = ProviderOptions {
            os: self.os,
            certificate_authority,
            daemon_filter: self.daemon,
            registration_timeout: None,
        };

        let mut provider =
            provider::build(log, env, &source, imds.as_ref(), options)
                .await
                .map_err(provider_error)?;
        bootstrap::run(provider.as_mut(), &skip)
            .await
            .map_err(bootstrap_error)
    }
}

fn provider_error(err: ProviderError) -> CmdError {
    if err.is_usage_error() {
        CmdError::Usage(err.to_string())
    } else {
        CmdError::Failure(
            anyhow::Error::new(err).context("loading node configuration"),
        )
    }
}

fn bootstrap_error(err: BootstrapError) -> CmdError {
    let context = match err.phase() {
        Some(phase) => format!("phase {phase} failed"),
        None => "bootstrap cleanup failed".to_string(),
    };
    CmdError::Failure(anyhow::Error::new(err).context(context))
}

fn stderr_env_drain(env_var: &str) -> impl Drain<Ok = (), Err = slog::Never> {
    let stderr_decorator = slog_term::TermDecorator::new().stderr().build();
    let stderr_drain =
        slog_term::FullFormat::new(stderr_decorator).build().fuse();
    let mut builder = slog_envlogger::LogBuilder::new(stderr_drain);
    if let Ok(s) = std::env::var(env_var) {
        builder = builder.parse(&s);
    } else {
        // Log at the info level by default.
        builder = builder.filter(None, slog::FilterLevel::Info);
    }
    builder.build()
}
