//! Broker management HTTP API client
//!
//! Only two read-only endpoints are used: `GET /api/overview` and
//! `GET /api/queues[/<vhost>]`, both with basic auth using the AMQP credentials.

use crate::config::BrokerConfig;
use crate::error::{BrokerError, BrokerResult};
use crate::protocol::Naming;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Broker overview; fields other than the version are kept as-is
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Overview {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rabbitmq_version: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One entry of the queue listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub name: String,
    #[serde(default)]
    pub consumers: u64,
    #[serde(default)]
    pub messages: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Aggregated view returned by the metrics probe
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrokerMetrics {
    pub overview: Overview,
    /// Consumer count of the first push queue that has consumers
    pub consumers: u64,
    /// Queues belonging to this prefix
    pub queues: Vec<QueueInfo>,
}

impl BrokerMetrics {
    /// Keep the prefix's queues and pick the worker consumer count
    pub fn summarize(naming: &Naming, overview: Overview, queues: Vec<QueueInfo>) -> Self {
        let queues: Vec<QueueInfo> = queues
            .into_iter()
            .filter(|queue| naming.owns_queue(&queue.name))
            .collect();

        let consumers = queues
            .iter()
            .find(|queue| naming.is_push_queue(&queue.name) && queue.consumers > 0)
            .map(|queue| queue.consumers)
            .unwrap_or(0);

        Self {
            overview,
            consumers,
            queues,
        }
    }
}

/// Read-only client for the management API
#[derive(Clone)]
pub struct ManagementClient {
    client: Client,
    base_url: Url,
    vhost: String,
    username: String,
    password: String,
}

impl std::fmt::Debug for ManagementClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagementClient")
            .field("base_url", &self.base_url.as_str())
            .field("vhost", &self.vhost)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// `http[s]://host:port` of the management API
pub fn management_base_url(config: &BrokerConfig) -> BrokerResult<Url> {
    let scheme = if config.management.use_ssl {
        "https"
    } else {
        "http"
    };
    let raw = format!(
        "{}://{}:{}",
        scheme,
        config.management_hostname(),
        config.management.port
    );
    Url::parse(&raw).map_err(|e| BrokerError::InvalidUri(format!("{raw}: {e}")))
}

impl ManagementClient {
    pub fn new(config: &BrokerConfig) -> BrokerResult<Self> {
        let base_url = management_base_url(config)?;

        let mut builder = Client::builder().timeout(Duration::from_secs(config.management.timeout_secs));
        if config.management.use_ssl && !config.management.reject_unauthorized {
            warn!("Management API certificate verification disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }

        Ok(Self {
            client: builder.build()?,
            base_url,
            vhost: config.amqp.vhost.clone(),
            username: config.amqp.username.clone(),
            password: config.amqp.password.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// URL of `/api/<segments>`, each segment percent-encoded
    fn endpoint(&self, segments: &[&str]) -> BrokerResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BrokerError::InvalidUri(self.base_url.to_string()))?
            .clear()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    /// Queue listing URL; the default vhost lists across all vhosts
    pub fn queues_url(&self) -> BrokerResult<Url> {
        if self.vhost == "/" {
            self.endpoint(&["queues"])
        } else {
            self.endpoint(&["queues", self.vhost.as_str()])
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> BrokerResult<T> {
        let path = url.path().to_string();
        debug!(path = %path, "Management API request");

        let response = self
            .client
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BrokerError::ManagementStatus {
                status: status.as_u16(),
                path,
            });
        }

        Ok(response.json().await?)
    }

    pub async fn overview(&self) -> BrokerResult<Overview> {
        let url = self.endpoint(&["overview"])?;
        self.get_json(url).await
    }

    pub async fn queues(&self) -> BrokerResult<Vec<QueueInfo>> {
        let url = self.queues_url()?;
        self.get_json(url).await
    }
}
