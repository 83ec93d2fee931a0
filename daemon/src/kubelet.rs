// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The node agent that registers the node with the cluster.

use crate::unit::Unit;
use crate::{Daemon, DaemonError};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use camino::Utf8PathBuf;
use nodeadm_api::NodeConfig;
use nodeadm_host_utils::fs::{rooted, write_file};
use nodeadm_host_utils::systemd::BoxedServiceManager;
use serde_json::{json, Map, Value};
use slog::{info, Logger};
use std::net::Ipv4Addr;

pub const NAME: &str = "kubelet";

const CONFIG_PATH: &str = "/etc/kubernetes/kubelet/config.json";
const KUBECONFIG_PATH: &str = "/var/lib/kubelet/kubeconfig";
const CA_PATH: &str = "/etc/kubernetes/pki/ca.crt";
const ENV_PATH: &str = "/etc/eks/kubelet/environment";

/// The cluster DNS service lives at the tenth address of the service CIDR.
fn cluster_dns(cidr: &str) -> Option<String> {
    let (network, _) = cidr.split_once('/')?;
    let network: Ipv4Addr = network.parse().ok()?;
    let dns = u32::from(network).checked_add(10)?;
    Some(Ipv4Addr::from(dns).to_string())
}

fn render_config(config: &NodeConfig) -> Result<Vec<u8>, DaemonError> {
    let mut rendered = match json!({
        "kind": "KubeletConfiguration",
        "apiVersion": "kubelet.config.k8s.io/v1beta1",
        "address": "0.0.0.0",
        "authentication": {
            "anonymous": { "enabled": false },
            "webhook": { "cacheTTL": "2m0s", "enabled": true },
            "x509": { "clientCAFile": CA_PATH },
        },
        "authorization": {
            "mode": "Webhook",
            "webhook": {
                "cacheAuthorizedTTL": "5m0s",
                "cacheUnauthorizedTTL": "30s",
            },
        },
        "cgroupDriver": "systemd",
        "clusterDomain": "cluster.local",
        "containerRuntimeEndpoint": "unix:///run/containerd/containerd.sock",
        "hairpinMode": "hairpin-veth",
        "serializeImagePulls": false,
        "serverTLSBootstrap": true,
    }) {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    if let Some(dns) =
        config.spec.cluster.cidr.as_deref().and_then(cluster_dns)
    {
        rendered.insert("clusterDNS".to_string(), json!([dns]));
    }
    if let Some(instance) = &config.status.instance {
        rendered.insert(
            "providerID".to_string(),
            json!(format!(
                "aws:///{}/{}",
                instance.availability_zone, instance.id
            )),
        );
    }

    // Operator-supplied keys win over the generated ones.
    rendered.extend(config.spec.kubelet.config.clone());

    serde_json::to_vec_pretty(&Value::Object(rendered))
        .map_err(|err| DaemonError::Render { what: "kubelet config", err })
}

fn render_kubeconfig(config: &NodeConfig) -> String {
    let cluster = &config.spec.cluster;
    let region = config.region().unwrap_or_default();
    let env: String = config
        .aws_environment()
        .into_iter()
        .map(|(name, value)| {
            format!(
                "      - name: {name}\n        value: {}\n",
                Value::String(value)
            )
        })
        .collect();
    format!(
        r#"---
apiVersion: v1
kind: Config
clusters:
  - name: kubernetes
    cluster:
      certificate-authority: {CA_PATH}
      server: {server}
current-context: kubelet
contexts:
  - name: kubelet
    context:
      cluster: kubernetes
      user: kubelet
users:
  - name: kubelet
    user:
      exec:
        apiVersion: client.authentication.k8s.io/v1beta1
        command: aws
        args:
          - eks
          - get-token
          - --cluster-name
          - {name}
          - --region
          - {region}
        env:
{env}"#,
        server = cluster.api_server_endpoint,
        name = cluster.name,
    )
}

fn render_environment(config: &NodeConfig, node_name: &str) -> String {
    let mut args = vec![
        format!("--config={CONFIG_PATH}"),
        format!("--kubeconfig={KUBECONFIG_PATH}"),
        format!("--hostname-override={node_name}"),
    ];
    args.extend(config.spec.kubelet.flags.iter().cloned());
    format!("NODEADM_KUBELET_ARGS={}\n", quote_environment(&args.join(" ")))
}

/// Double-quotes a value for a systemd `EnvironmentFile=`.
fn quote_environment(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

pub struct Kubelet {
    log: Logger,
    root: Utf8PathBuf,
    unit: Unit,
}

impl Kubelet {
    /// `root` is prefixed to every path written; `/` on a real host.
    pub fn new(
        log: &Logger,
        root: Utf8PathBuf,
        service_manager: BoxedServiceManager,
    ) -> Self {
        let unit = Unit::new(NAME, &root, service_manager);
        Self { log: log.new(slog::o!("daemon" => NAME)), root, unit }
    }
}

#[async_trait]
impl Daemon for Kubelet {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn configure(&self, config: &NodeConfig) -> Result<(), DaemonError> {
        let node_name = config
            .resolved_node_name()
            .ok_or(DaemonError::MissingNodeName)?;
        let ca = STANDARD
            .decode(config.spec.cluster.certificate_authority.trim())
            .map_err(DaemonError::CertificateAuthority)?;

        let files = [
            (CA_PATH, ca, 0o644),
            (CONFIG_PATH, render_config(config)?, 0o644),
            (KUBECONFIG_PATH, render_kubeconfig(config).into_bytes(), 0o600),
            (
                ENV_PATH,
                render_environment(config, node_name).into_bytes(),
                0o644,
            ),
        ];
        let mut changed = false;
        for (path, contents, mode) in files {
            changed |= write_file(&rooted(&self.root, path), &contents, mode)?;
        }

        info!(
            self.log,
            "configured kubelet";
            "node_name" => node_name,
            "changed" => changed,
        );
        if changed {
            self.unit.mark_changed()?;
        }
        Ok(())
    }

    async fn ensure_running(&self) -> Result<(), DaemonError> {
        self.unit.ensure_running(&self.log).await
    }

    async fn post_launch(
        &self,
        _config: &NodeConfig,
    ) -> Result<(), DaemonError> {
        Ok(())
    }
}
