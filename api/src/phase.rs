// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeSet;
use std::str::FromStr;

/// One stage of the bootstrap sequence, in execution order.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum Phase {
    AspectSetup,
    PreProcessDaemon,
    CredentialConfiguration,
    DaemonConfiguration,
    DaemonRun,
}

impl Phase {
    /// Later phases depend on the side effects of aspect setup and credential
    /// configuration, so those two always run.
    pub fn is_skippable(self) -> bool {
        !matches!(self, Phase::AspectSetup | Phase::CredentialConfiguration)
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SkipPhaseError {
    #[error("Unknown phase {0:?}")]
    Unknown(String),

    #[error("Phase {0} cannot be skipped")]
    Mandatory(Phase),
}

/// The set of phases a caller asked to skip.
///
/// Construction rejects mandatory phases, so holding a `SkipPhases` means
/// every member is safe to skip.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SkipPhases(BTreeSet<Phase>);

impl SkipPhases {
    pub fn new<I>(phases: I) -> Result<Self, SkipPhaseError>
    where
        I: IntoIterator<Item = Phase>,
    {
        let phases: BTreeSet<Phase> = phases.into_iter().collect();
        if let Some(phase) = phases.iter().find(|p| !p.is_skippable()) {
            return Err(SkipPhaseError::Mandatory(*phase));
        }
        Ok(Self(phases))
    }

    /// Parses phase names as given on the command line.
    pub fn from_names<I, S>(names: I) -> Result<Self, SkipPhaseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phases = names
            .into_iter()
            .map(|name| {
                let name = name.as_ref();
                Phase::from_str(name)
                    .map_err(|_| SkipPhaseError::Unknown(name.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(phases)
    }

    pub fn contains(&self, phase: Phase) -> bool {
        self.0.contains(&phase)
    }

    pub fn iter(&self) -> impl Iterator<Item = Phase> + '_ {
        self.0.iter().copied()
    }
}
