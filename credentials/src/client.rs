// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration for API clients acting on behalf of the node.

use crate::CredentialError;
use camino::Utf8PathBuf;
use nodeadm_api::{
    CredentialProviderKind, HybridOptions, NodeConfig, HYBRID_AWS_PROFILE,
    SSM_SHARED_CREDENTIALS_PATH,
};

/// How an AWS API client on this node finds its credentials.
///
/// This is the API client bound to the node's credential strategy. It is
/// resolved once during credential configuration and kept by the node
/// provider for the rest of the run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AwsClientConfig {
    pub provider: CredentialProviderKind,
    pub region: String,
    pub profile: String,
    pub shared_config_file: Option<Utf8PathBuf>,
    pub shared_credentials_file: Option<Utf8PathBuf>,
}

impl AwsClientConfig {
    pub fn for_node(config: &NodeConfig) -> Result<Self, CredentialError> {
        let region = config
            .region()
            .ok_or(CredentialError::MissingRegion)?
            .to_string();
        let provider = config.credential_provider_kind();
        let client = match (provider, &config.spec.hybrid) {
            (
                CredentialProviderKind::IamRolesAnywhere,
                Some(HybridOptions { iam_roles_anywhere: Some(ira), .. }),
            ) => AwsClientConfig {
                provider,
                region,
                profile: HYBRID_AWS_PROFILE.to_string(),
                shared_config_file: Some(ira.aws_config_path().to_owned()),
                shared_credentials_file: None,
            },
            (CredentialProviderKind::IamRolesAnywhere, _) => {
                return Err(CredentialError::MissingOptions(provider));
            }
            (CredentialProviderKind::Ssm, _) => AwsClientConfig {
                provider,
                region,
                profile: "default".to_string(),
                shared_config_file: None,
                shared_credentials_file: Some(Utf8PathBuf::from(
                    SSM_SHARED_CREDENTIALS_PATH,
                )),
            },
            (CredentialProviderKind::Ec2InstanceRole, _) => AwsClientConfig {
                provider,
                region,
                profile: "default".to_string(),
                shared_config_file: None,
                shared_credentials_file: None,
            },
        };
        Ok(client)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use nodeadm_api::{
        ClusterDetails, IamRolesAnywhereOptions, NodeConfigSpec, SsmOptions,
    };

    fn config(hybrid: Option<HybridOptions>) -> NodeConfig {
        NodeConfig::new(NodeConfigSpec {
            cluster: ClusterDetails {
                region: Some("us-west-2".to_string()),
                ..Default::default()
            },
            hybrid,
            ..Default::default()
        })
    }

    #[test]
    fn test_client_matches_node_environment() {
        let configs = [
            config(Some(HybridOptions {
                ssm: Some(SsmOptions::default()),
                iam_roles_anywhere: None,
            })),
            config(Some(HybridOptions {
                ssm: None,
                iam_roles_anywhere: Some(IamRolesAnywhereOptions::default()),
            })),
        ];
        for config in configs {
            let client = AwsClientConfig::for_node(&config).unwrap();
            assert_eq!(client.provider, config.credential_provider_kind());
            let env = config.aws_environment();
            let lookup = |key: &str| {
                env.iter().find(|(k, _)| *k == key).map(|(_, v)| v.clone())
            };
            assert_eq!(Some(client.region.clone()), lookup("AWS_REGION"));
            assert_eq!(Some(client.profile.clone()), lookup("AWS_PROFILE"));
            assert_eq!(
                client.shared_config_file.as_ref().map(|p| p.to_string()),
                lookup("AWS_CONFIG_FILE")
            );
            assert_eq!(
                client.shared_credentials_file.as_ref().map(|p| p.to_string()),
                lookup("AWS_SHARED_CREDENTIALS_FILE")
            );
        }
    }

    #[test]
    fn test_region_required() {
        let mut config = config(None);
        config.spec.cluster.region = None;
        assert!(matches!(
            AwsClientConfig::for_node(&config),
            Err(CredentialError::MissingRegion)
        ));
    }
}
