// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Where the node configuration document comes from.

use crate::imds::{ImdsError, InstanceMetadata};
use camino::Utf8PathBuf;
use nodeadm_api::{ConfigOrigin, NodeConfig, ParseError};
use std::fmt;
use std::str::FromStr;

#[derive(thiserror::Error, Debug)]
pub enum ConfigSourceError {
    #[error("Unsupported configuration source {0:?}")]
    Unsupported(String),

    #[error("Failed to read configuration from {path}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },

    #[error("Failed to fetch configuration from instance user data")]
    UserData(#[source] ImdsError),

    #[error("Failed to parse configuration from {source_uri}")]
    Parse {
        source_uri: String,
        #[source]
        err: ParseError,
    },
}

/// A configuration source, as given on the command line.
///
/// Accepts a bare path, `file://<path>`, or `imds://user-data`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigSource {
    File(Utf8PathBuf),
    InstanceUserData,
}

impl FromStr for ConfigSource {
    type Err = ConfigSourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("file://") {
            return Ok(ConfigSource::File(path.into()));
        }
        if s == "imds://user-data" {
            return Ok(ConfigSource::InstanceUserData);
        }
        if s.is_empty() || s.contains("://") {
            return Err(ConfigSourceError::Unsupported(s.to_string()));
        }
        Ok(ConfigSource::File(s.into()))
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "file://{path}"),
            ConfigSource::InstanceUserData => f.write_str("imds://user-data"),
        }
    }
}

impl ConfigSource {
    pub fn origin(&self) -> ConfigOrigin {
        match self {
            ConfigSource::File(_) => ConfigOrigin::LocalFile,
            ConfigSource::InstanceUserData => ConfigOrigin::InstanceMetadata,
        }
    }

    /// Loads and parses the document. `imds` is only consulted for
    /// [ConfigSource::InstanceUserData].
    pub async fn load(
        &self,
        imds: &dyn InstanceMetadata,
    ) -> Result<NodeConfig, ConfigSourceError> {
        let contents = match self {
            ConfigSource::File(path) => std::fs::read_to_string(path)
                .map_err(|err| ConfigSourceError::Read {
                    path: path.clone(),
                    err,
                })?,
            ConfigSource::InstanceUserData => imds
                .get("user-data")
                .await
                .map_err(ConfigSourceError::UserData)?,
        };
        NodeConfig::from_yaml(&contents).map_err(|err| {
            ConfigSourceError::Parse { source_uri: self.to_string(), err }
        })
    }
}
