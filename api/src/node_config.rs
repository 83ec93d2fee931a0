// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::CredentialProviderKind;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

pub const API_VERSION: &str = "node.eks.aws/v1alpha1";
pub const KIND: &str = "NodeConfig";

pub const DEFAULT_CERTIFICATE_PATH: &str = "/etc/iam/pki/server.pem";
pub const DEFAULT_PRIVATE_KEY_PATH: &str = "/etc/iam/pki/server.key";
pub const DEFAULT_AWS_CONFIG_PATH: &str = "/etc/aws/hybrid/config";
/// Where the SSM agent stores the credentials of its managed instance.
pub const SSM_SHARED_CREDENTIALS_PATH: &str = "/root/.aws/credentials";
/// The profile written into the IAM Roles Anywhere shared config file.
pub const HYBRID_AWS_PROFILE: &str = "hybrid";

#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("Failed to parse node configuration")]
    Document(#[from] serde_yaml::Error),

    #[error("Unsupported apiVersion {found:?} (expected {API_VERSION:?})")]
    ApiVersion { found: String },

    #[error("Unsupported kind {found:?} (expected {KIND:?})")]
    Kind { found: String },
}

/// The desired node: what the operator asked for (`spec`) plus what the
/// bootstrap agent discovered about the machine (`status`).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub spec: NodeConfigSpec,
    /// Populated during enrichment; never read from a configuration source.
    #[serde(default, skip_deserializing)]
    pub status: NodeConfigStatus,
}

impl NodeConfig {
    pub fn new(spec: NodeConfigSpec) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            spec,
            status: NodeConfigStatus::default(),
        }
    }

    /// Parses a YAML (or JSON) document.
    pub fn from_yaml(contents: &str) -> Result<Self, ParseError> {
        let config: NodeConfig = serde_yaml::from_str(contents)?;
        if config.api_version != API_VERSION {
            return Err(ParseError::ApiVersion { found: config.api_version });
        }
        if config.kind != KIND {
            return Err(ParseError::Kind { found: config.kind });
        }
        Ok(config)
    }

    /// A node is hybrid when it carries hybrid options.
    pub fn is_hybrid(&self) -> bool {
        self.spec.hybrid.is_some()
    }

    /// The credential strategy this node uses.
    ///
    /// Hybrid nodes with neither (or both) strategies configured are rejected
    /// by validation; for those this reports the SSM strategy first.
    pub fn credential_provider_kind(&self) -> CredentialProviderKind {
        match &self.spec.hybrid {
            None => CredentialProviderKind::Ec2InstanceRole,
            Some(hybrid) if hybrid.ssm.is_some() => {
                CredentialProviderKind::Ssm
            }
            Some(_) => CredentialProviderKind::IamRolesAnywhere,
        }
    }

    /// The name the node registers with the cluster, once it's known.
    pub fn resolved_node_name(&self) -> Option<&str> {
        if self.is_hybrid() {
            self.status.hybrid.node_name.as_deref()
        } else {
            self.status
                .instance
                .as_ref()
                .map(|instance| instance.private_dns_name.as_str())
        }
    }

    /// Environment that points AWS SDK clients (including the kubelet's
    /// token exec plugin) at this node's credentials.
    pub fn aws_environment(&self) -> Vec<(&'static str, String)> {
        let mut env = Vec::new();
        if let Some(region) = self.region() {
            env.push(("AWS_REGION", region.to_string()));
        }
        match self.spec.hybrid.as_ref() {
            Some(HybridOptions { iam_roles_anywhere: Some(ira), .. }) => {
                env.push((
                    "AWS_CONFIG_FILE",
                    ira.aws_config_path().to_string(),
                ));
                env.push(("AWS_PROFILE", HYBRID_AWS_PROFILE.to_string()));
            }
            Some(_) => {
                env.push((
                    "AWS_SHARED_CREDENTIALS_FILE",
                    SSM_SHARED_CREDENTIALS_PATH.to_string(),
                ));
                env.push(("AWS_PROFILE", "default".to_string()));
            }
            None => {}
        }
        env
    }

    /// The region the node lives in, from configuration or (for EC2 nodes)
    /// instance metadata.
    pub fn region(&self) -> Option<&str> {
        self.spec.cluster.region.as_deref().or_else(|| {
            self.status.instance.as_ref().map(|i| i.region.as_str())
        })
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfigSpec {
    #[serde(default)]
    pub cluster: ClusterDetails,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hybrid: Option<HybridOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<InstanceOptions>,
    #[serde(default)]
    pub kubelet: KubeletOptions,
    #[serde(default)]
    pub containerd: ContainerdOptions,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDetails {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default)]
    pub api_server_endpoint: String,
    /// Base64-encoded PEM bundle of the cluster certificate authority.
    #[serde(default)]
    pub certificate_authority: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
}

/// Options for nodes joining from outside the cloud provider's network.
///
/// Exactly one of the credential strategies must be set.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HybridOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssm: Option<SsmOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iam_roles_anywhere: Option<IamRolesAnywhereOptions>,
}

/// A one-time activation exchanged for a managed-instance id.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SsmOptions {
    #[serde(default)]
    pub activation_code: String,
    #[serde(default)]
    pub activation_id: String,
}

/// Certificate-based credentials exchanged through a signing helper.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IamRolesAnywhereOptions {
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub trust_anchor_arn: String,
    #[serde(default)]
    pub profile_arn: String,
    #[serde(default)]
    pub role_arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_path: Option<Utf8PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<Utf8PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_config_path: Option<Utf8PathBuf>,
}

impl IamRolesAnywhereOptions {
    pub fn certificate_path(&self) -> &Utf8Path {
        self.certificate_path
            .as_deref()
            .unwrap_or(Utf8Path::new(DEFAULT_CERTIFICATE_PATH))
    }

    pub fn private_key_path(&self) -> &Utf8Path {
        self.private_key_path
            .as_deref()
            .unwrap_or(Utf8Path::new(DEFAULT_PRIVATE_KEY_PATH))
    }

    pub fn aws_config_path(&self) -> &Utf8Path {
        self.aws_config_path
            .as_deref()
            .unwrap_or(Utf8Path::new(DEFAULT_AWS_CONFIG_PATH))
    }
}

/// Options only meaningful for nodes running on cloud instances.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_storage: Option<LocalStorageOptions>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalStorageOptions {
    pub strategy: LocalStorageStrategy,
}

#[derive(
    Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, strum::Display,
)]
pub enum LocalStorageStrategy {
    #[serde(rename = "RAID0")]
    #[strum(serialize = "raid0")]
    Raid0,
    #[serde(rename = "RAID10")]
    #[strum(serialize = "raid10")]
    Raid10,
    #[serde(rename = "Mount")]
    #[strum(serialize = "mount")]
    Mount,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubeletOptions {
    /// Merged over the generated kubelet configuration.
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
    /// Extra command-line flags.
    #[serde(default)]
    pub flags: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerdOptions {
    /// A TOML fragment installed as a drop-in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfigStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<InstanceDetails>,
    #[serde(default)]
    pub defaults: DefaultImages,
    #[serde(default)]
    pub hybrid: HybridStatus,
}

/// What instance metadata reported about the machine.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceDetails {
    pub id: String,
    pub region: String,
    pub instance_type: String,
    pub availability_zone: String,
    pub private_dns_name: String,
    /// MAC address of the primary network interface.
    #[serde(default)]
    pub mac: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DefaultImages {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_image: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HybridStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
}
