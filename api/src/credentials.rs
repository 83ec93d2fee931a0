// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::{Deserialize, Serialize};

/// The closed set of ways a node can obtain cluster credentials.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Serialize,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
pub enum CredentialProviderKind {
    /// A one-time activation exchanged for a managed-instance identity.
    #[serde(rename = "ssm")]
    #[strum(serialize = "ssm")]
    Ssm,
    /// A certificate/key pair exchanged through a signing helper.
    #[serde(rename = "iam-ra")]
    #[strum(serialize = "iam-ra")]
    IamRolesAnywhere,
    /// The instance role of a cloud instance.
    #[serde(rename = "ec2")]
    #[strum(serialize = "ec2")]
    Ec2InstanceRole,
}

impl CredentialProviderKind {
    /// Strategies that only work on cloud instances.
    pub fn is_cloud_only(self) -> bool {
        matches!(self, CredentialProviderKind::Ec2InstanceRole)
    }

    /// Strategies that need an agent running before other daemons can be
    /// configured.
    pub fn requires_agent(self) -> bool {
        matches!(self, CredentialProviderKind::Ssm)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_names_round_trip_through_display() {
        for kind in CredentialProviderKind::iter() {
            let name = kind.to_string();
            assert_eq!(CredentialProviderKind::from_str(&name).unwrap(), kind);
        }
        assert!(CredentialProviderKind::from_str("password").is_err());
    }

    #[test]
    fn test_only_ssm_requires_an_agent() {
        let agents: Vec<_> = CredentialProviderKind::iter()
            .filter(|kind| kind.requires_agent())
            .collect();
        assert_eq!(agents, vec![CredentialProviderKind::Ssm]);
    }
}
