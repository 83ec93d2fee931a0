// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Checks a [NodeConfig] before any phase runs.

use crate::NodeConfig;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use std::sync::LazyLock;

const MAX_NODE_NAME_LEN: usize = 64;

/// Where a configuration document came from.
///
/// Some sources only exist on cloud instances, which hybrid nodes are not.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigOrigin {
    LocalFile,
    InstanceMetadata,
}

/// Every problem found in a configuration, reported together.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("invalid node configuration: {}", .problems.join("; "))]
pub struct ValidationError {
    pub problems: Vec<String>,
}

static NODE_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$",
    )
    .expect("node name validation regex should be valid")
});

/// Returns true if `name` can be used as a node name.
pub fn is_valid_node_name(name: &str) -> bool {
    name.len() <= MAX_NODE_NAME_LEN && NODE_NAME_REGEX.is_match(name)
}

pub fn validate(
    config: &NodeConfig,
    origin: ConfigOrigin,
) -> Result<(), ValidationError> {
    let mut problems = Vec::new();
    let cluster = &config.spec.cluster;

    if cluster.name.is_empty() {
        problems.push("cluster.name is required".to_string());
    }
    if cluster.api_server_endpoint.is_empty() {
        problems.push("cluster.apiServerEndpoint is required".to_string());
    }
    if cluster.certificate_authority.is_empty() {
        problems.push("cluster.certificateAuthority is required".to_string());
    } else if STANDARD.decode(cluster.certificate_authority.trim()).is_err() {
        problems.push(
            "cluster.certificateAuthority is not valid base64".to_string(),
        );
    }

    if let Some(hybrid) = &config.spec.hybrid {
        if cluster.region.as_deref().unwrap_or("").is_empty() {
            problems.push(
                "cluster.region is required for hybrid nodes".to_string(),
            );
        }
        if config.spec.instance.is_some() {
            problems.push(
                "instance options are not supported on hybrid nodes"
                    .to_string(),
            );
        }
        if origin == ConfigOrigin::InstanceMetadata {
            problems.push(
                "hybrid nodes cannot load configuration from instance metadata"
                    .to_string(),
            );
        }

        match (&hybrid.ssm, &hybrid.iam_roles_anywhere) {
            (Some(_), Some(_)) => problems.push(
                "only one of hybrid.ssm and hybrid.iamRolesAnywhere may be set"
                    .to_string(),
            ),
            (None, None) => problems.push(
                "one of hybrid.ssm or hybrid.iamRolesAnywhere is required"
                    .to_string(),
            ),
            _ => {}
        }

        if let Some(ssm) = &hybrid.ssm {
            if ssm.activation_code.is_empty() {
                problems.push("hybrid.ssm.activationCode is required".into());
            }
            if ssm.activation_id.is_empty() {
                problems.push("hybrid.ssm.activationId is required".into());
            }
        }

        if let Some(ira) = &hybrid.iam_roles_anywhere {
            let required = [
                ("nodeName", &ira.node_name),
                ("trustAnchorArn", &ira.trust_anchor_arn),
                ("profileArn", &ira.profile_arn),
                ("roleArn", &ira.role_arn),
            ];
            for (field, value) in required {
                if value.is_empty() {
                    problems.push(format!(
                        "hybrid.iamRolesAnywhere.{field} is required"
                    ));
                }
            }
            if !ira.node_name.is_empty() && !is_valid_node_name(&ira.node_name)
            {
                problems.push(format!(
                    "hybrid.iamRolesAnywhere.nodeName {:?} must be a \
                     lowercase RFC 1123 subdomain of at most \
                     {MAX_NODE_NAME_LEN} characters",
                    ira.node_name
                ));
            }
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { problems })
    }
}
