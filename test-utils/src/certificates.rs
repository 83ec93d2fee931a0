// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Utilities for tests that need certificates.

/// A self-signed certificate authority, standing in for the one an operator
/// registers as a trust anchor.
pub struct CertificateAuthority {
    keypair: rcgen::Certificate,
    cert_pem: String,
}

impl CertificateAuthority {
    pub fn new<S: Into<String>>(common_name: S) -> Self {
        let mut params = rcgen::CertificateParams::new(vec![]);
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params.distinguished_name = rcgen::DistinguishedName::new();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, common_name.into());
        params.key_usages = vec![
            rcgen::KeyUsagePurpose::KeyCertSign,
            rcgen::KeyUsagePurpose::CrlSign,
            rcgen::KeyUsagePurpose::DigitalSignature,
        ];
        let keypair = rcgen::Certificate::from_params(params)
            .expect("failed to generate CA keys");
        let cert_pem =
            keypair.serialize_pem().expect("failed to serialize CA cert");
        Self { keypair, cert_pem }
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn key_pem(&self) -> String {
        self.keypair.serialize_private_key_pem()
    }
}
