// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client for the EC2 instance metadata service (IMDSv2).

use async_trait::async_trait;
use nodeadm_api::InstanceDetails;
use nodeadm_common::backoff::{
    local_service_policy, retry_notify, BackoffError,
};
use reqwest::StatusCode;
use slog::{warn, Logger};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "http://169.254.169.254";

const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";
const TOKEN_TTL_SECONDS: &str = "21600";

#[derive(thiserror::Error, Debug)]
pub enum ImdsError {
    #[error("Failed to query instance metadata at {path}")]
    Request {
        path: String,
        #[source]
        err: reqwest::Error,
    },

    #[error("Instance metadata at {path} returned {status}")]
    Status { path: String, status: StatusCode },
}

impl ImdsError {
    fn is_retryable(&self) -> bool {
        match self {
            ImdsError::Request { err, .. } => {
                err.is_connect() || err.is_timeout()
            }
            ImdsError::Status { status, .. } => status.is_server_error(),
        }
    }
}

/// Read access to instance metadata.
#[async_trait]
pub trait InstanceMetadata: Send + Sync {
    /// Fetches `latest/<path>`, e.g. `meta-data/instance-id`.
    async fn get(&self, path: &str) -> Result<String, ImdsError>;
}

pub type BoxedInstanceMetadata = Arc<dyn InstanceMetadata>;

pub struct ImdsClient {
    log: Logger,
    client: reqwest::Client,
    endpoint: String,
}

impl ImdsClient {
    pub fn new(log: &Logger, endpoint: &str) -> Arc<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Arc::new(Self {
            log: log.new(slog::o!("component" => "ImdsClient")),
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn as_instance_metadata(self: Arc<Self>) -> BoxedInstanceMetadata {
        self
    }

    async fn send(
        &self,
        path: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<String, ImdsError> {
        let request_err =
            |err| ImdsError::Request { path: path.to_string(), err };
        let response = request.send().await.map_err(request_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ImdsError::Status { path: path.to_string(), status });
        }
        response.text().await.map_err(request_err)
    }

    async fn get_once(&self, path: &str) -> Result<String, ImdsError> {
        let token_path = "api/token";
        let token = self
            .send(
                token_path,
                self.client
                    .put(format!("{}/latest/{token_path}", self.endpoint))
                    .header(TOKEN_TTL_HEADER, TOKEN_TTL_SECONDS),
            )
            .await?;
        self.send(
            path,
            self.client
                .get(format!("{}/latest/{path}", self.endpoint))
                .header(TOKEN_HEADER, token),
        )
        .await
    }
}

#[async_trait]
impl InstanceMetadata for ImdsClient {
    async fn get(&self, path: &str) -> Result<String, ImdsError> {
        retry_notify(
            local_service_policy(),
            || async move {
                self.get_once(path).await.map_err(|err| {
                    if err.is_retryable() {
                        BackoffError::transient(err)
                    } else {
                        BackoffError::permanent(err)
                    }
                })
            },
            |err: ImdsError, delay: Duration| {
                warn!(
                    self.log,
                    "instance metadata unavailable";
                    "path" => path,
                    "error" => %err,
                    "retry_after" => ?delay,
                );
            },
        )
        .await
    }
}

/// Collects what the node needs to know about the instance it runs on.
pub async fn instance_details(
    imds: &dyn InstanceMetadata,
) -> Result<InstanceDetails, ImdsError> {
    let get = |path: &'static str| async move {
        imds.get(&format!("meta-data/{path}"))
            .await
            .map(|value| value.trim().to_string())
    };
    Ok(InstanceDetails {
        id: get("instance-id").await?,
        region: get("placement/region").await?,
        instance_type: get("instance-type").await?,
        availability_zone: get("placement/availability-zone").await?,
        private_dns_name: get("local-hostname").await?,
        mac: get("mac").await?,
    })
}
