// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Credentials from a certificate signed by a registered trust anchor.
//!
//! The node presents a short-lived certificate to the signing helper, which
//! the AWS SDK credential chain invokes through `credential_process`.

use crate::{CredentialError, CredentialProvider, File, NodeSpec};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use nodeadm_api::{
    CredentialProviderKind, HybridOptions, IamRolesAnywhereOptions,
    NodeConfig, HYBRID_AWS_PROFILE,
};
use nodeadm_host_utils::fs::rooted;
use rcgen::{
    Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, KeyPair, KeyUsagePurpose,
};
use time::{Duration, OffsetDateTime};

pub const SIGNING_HELPER: &str = "aws_signing_helper";

const MAX_COMMON_NAME_LEN: usize = 64;
const CERTIFICATE_LIFETIME: Duration = Duration::hours(24);
const CLOCK_SKEW_ALLOWANCE: Duration = Duration::minutes(5);

#[derive(thiserror::Error, Debug)]
pub enum CertificateError {
    #[error("Failed to read certificate authority file {path}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },

    #[error("Failed to parse certificate authority")]
    BadCertificateAuthority(#[source] rcgen::RcgenError),

    #[error("Failed to generate node certificate")]
    Generate(#[source] rcgen::RcgenError),

    #[error("Failed to sign node certificate")]
    Sign(#[source] rcgen::RcgenError),
}

/// A certificate authority key pair supplied by the caller, in PEM form.
#[derive(Clone)]
pub struct CertificateAuthority {
    cert_pem: String,
    key_pem: String,
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("cert_pem", &self.cert_pem)
            .finish_non_exhaustive()
    }
}

impl CertificateAuthority {
    pub fn from_pem(cert_pem: String, key_pem: String) -> Self {
        Self { cert_pem, key_pem }
    }

    pub fn load(
        cert_path: &Utf8Path,
        key_path: &Utf8Path,
    ) -> Result<Self, CertificateError> {
        let read = |path: &Utf8Path| {
            std::fs::read_to_string(path).map_err(|err| {
                CertificateError::Read { path: path.to_owned(), err }
            })
        };
        Ok(Self::from_pem(read(cert_path)?, read(key_path)?))
    }

    fn signer(&self) -> Result<Certificate, CertificateError> {
        let key = KeyPair::from_pem(&self.key_pem)
            .map_err(CertificateError::BadCertificateAuthority)?;
        let params = CertificateParams::from_ca_cert_pem(&self.cert_pem, key)
            .map_err(CertificateError::BadCertificateAuthority)?;
        Certificate::from_params(params)
            .map_err(CertificateError::BadCertificateAuthority)
    }
}

/// Derives a certificate subject name from the node's role, credential
/// provider and operating system.
///
/// The result is lowercase, contains only `[a-z0-9.-]`, and is at most 64
/// characters long, so the same inputs always produce the same name.
pub fn common_name(role: &str, provider: &str, os: &str) -> String {
    format!("{role}-{provider}-{os}")
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .take(MAX_COMMON_NAME_LEN)
        .collect()
}

/// A node certificate and its private key, in PEM form.
pub struct NodeCertificate {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Mints a client certificate for `common_name`, signed by `ca`.
pub fn mint_node_certificate(
    ca: &CertificateAuthority,
    common_name: &str,
    now: OffsetDateTime,
) -> Result<NodeCertificate, CertificateError> {
    let signer = ca.signer()?;

    let mut params = CertificateParams::new(vec![]);
    params.alg = &rcgen::PKCS_ECDSA_P256_SHA256;
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, common_name);
    params.not_before = now - CLOCK_SKEW_ALLOWANCE;
    params.not_after = now + CERTIFICATE_LIFETIME;
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];

    let cert =
        Certificate::from_params(params).map_err(CertificateError::Generate)?;
    let cert_pem = cert
        .serialize_pem_with_signer(&signer)
        .map_err(CertificateError::Sign)?;
    Ok(NodeCertificate { cert_pem, key_pem: cert.serialize_private_key_pem() })
}

fn with_default_paths(
    options: &IamRolesAnywhereOptions,
) -> IamRolesAnywhereOptions {
    IamRolesAnywhereOptions {
        certificate_path: Some(options.certificate_path().to_owned()),
        private_key_path: Some(options.private_key_path().to_owned()),
        aws_config_path: Some(options.aws_config_path().to_owned()),
        ..options.clone()
    }
}

/// Renders the AWS shared config file that obtains credentials through the
/// signing helper.
pub fn render_aws_config(
    options: &IamRolesAnywhereOptions,
    region: &str,
) -> String {
    format!(
        "[profile {HYBRID_AWS_PROFILE}]\n\
         region = {region}\n\
         credential_process = {SIGNING_HELPER} credential-process \
         --certificate {} \
         --private-key {} \
         --trust-anchor-arn {} \
         --profile-arn {} \
         --role-arn {} \
         --role-session-name {}\n",
        options.certificate_path(),
        options.private_key_path(),
        options.trust_anchor_arn,
        options.profile_arn,
        options.role_arn,
        options.node_name,
    )
}

/// The certificate-based strategy.
pub struct IamRolesAnywhereProvider {
    root: Utf8PathBuf,
    options: IamRolesAnywhereOptions,
}

impl IamRolesAnywhereProvider {
    /// `root` is where [CredentialProvider::verify_uninstall] looks for
    /// leftover files; `/` on a real host.
    pub fn new(root: Utf8PathBuf, options: IamRolesAnywhereOptions) -> Self {
        Self { root, options }
    }

    fn options<'a>(
        &self,
        node: &'a NodeSpec,
    ) -> Result<&'a IamRolesAnywhereOptions, CredentialError> {
        node.hybrid
            .iam_roles_anywhere
            .as_ref()
            .ok_or(CredentialError::MissingOptions(self.name()))
    }
}

#[async_trait]
impl CredentialProvider for IamRolesAnywhereProvider {
    fn name(&self) -> CredentialProviderKind {
        CredentialProviderKind::IamRolesAnywhere
    }

    fn nodeadm_config(
        &self,
        node: &NodeSpec,
    ) -> Result<HybridOptions, CredentialError> {
        let options = self.options(node)?;
        Ok(HybridOptions {
            ssm: None,
            iam_roles_anywhere: Some(with_default_paths(options)),
        })
    }

    fn files_for_node(
        &self,
        node: &NodeSpec,
    ) -> Result<Vec<File>, CredentialError> {
        let options = self.options(node)?;
        let ca = node
            .certificate_authority
            .as_ref()
            .ok_or(CredentialError::MissingCertificateAuthority)?;
        let name =
            common_name(&node.role, &self.name().to_string(), &node.os);
        let minted =
            mint_node_certificate(ca, &name, OffsetDateTime::now_utc())?;
        Ok(vec![
            File {
                path: options.certificate_path().to_owned(),
                contents: minted.cert_pem.into_bytes(),
                mode: 0o644,
            },
            File {
                path: options.private_key_path().to_owned(),
                contents: minted.key_pem.into_bytes(),
                mode: 0o600,
            },
        ])
    }

    fn client_files(
        &self,
        config: &NodeConfig,
    ) -> Result<Vec<File>, CredentialError> {
        let options = config
            .spec
            .hybrid
            .as_ref()
            .and_then(|hybrid| hybrid.iam_roles_anywhere.as_ref())
            .ok_or(CredentialError::MissingOptions(self.name()))?;
        let region = config.region().ok_or(CredentialError::MissingRegion)?;
        Ok(vec![File {
            path: options.aws_config_path().to_owned(),
            contents: render_aws_config(options, region).into_bytes(),
            mode: 0o644,
        }])
    }

    async fn verify_uninstall(
        &self,
        _instance_id: &str,
    ) -> Result<(), CredentialError> {
        let paths: Vec<String> =
            [self.options.certificate_path(), self.options.private_key_path()]
                .into_iter()
                .filter(|path| rooted(&self.root, path.as_str()).exists())
                .map(|path| path.to_string())
                .collect();
        if paths.is_empty() {
            Ok(())
        } else {
            Err(CredentialError::FilesRemain { paths })
        }
    }
}
