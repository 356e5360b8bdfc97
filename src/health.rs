//! Broker health and metrics probe
//!
//! Liveness goes over AMQP (an idempotent exchange declare); version and
//! metrics go over the management HTTP API. [`HealthCheck`] adapts both to a
//! common reporting shape for callers that poll several components.

use crate::config::BrokerConfig;
use crate::error::{BrokerError, BrokerResult};
use crate::protocol::Naming;
use crate::transport::amqp::TopologyManager;
use crate::transport::management::{BrokerMetrics, ManagementClient};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn, Instrument};

/// Version reported when the management API cannot be reached
pub const DISCONNECTED: &str = "Disconnected";

/// Liveness, version and metrics queries against one broker
#[derive(Debug, Clone)]
pub struct BrokerProbe {
    topology: TopologyManager,
    management: ManagementClient,
}

impl BrokerProbe {
    pub fn new(topology: TopologyManager, management: ManagementClient) -> Self {
        Self {
            topology,
            management,
        }
    }

    pub fn from_config(topology: TopologyManager, config: &BrokerConfig) -> BrokerResult<Self> {
        Ok(Self::new(topology, ManagementClient::new(config)?))
    }

    pub fn naming(&self) -> &Naming {
        self.topology.naming()
    }

    pub fn management(&self) -> &ManagementClient {
        &self.management
    }

    /// Declare the connector exchange; any failure is reported as
    /// [`BrokerError::Unavailable`] wrapping the cause
    pub async fn is_alive(&self) -> BrokerResult<()> {
        self.topology
            .declare_connector_exchange()
            .await
            .map_err(BrokerError::unavailable)
    }

    /// Overview plus this prefix's queues and the worker consumer count
    pub async fn metrics(&self, user: &str) -> BrokerResult<BrokerMetrics> {
        let span = crate::management_span!(operation = "rabbitmq_metrics", user = %user);
        async {
            let overview = self.management.overview().await?;
            let queues = self.management.queues().await?;
            Ok(BrokerMetrics::summarize(self.naming(), overview, queues))
        }
        .instrument(span)
        .await
    }

    /// Broker version, or [`DISCONNECTED`] on any failure
    pub async fn version(&self) -> String {
        match self.management.overview().await {
            Ok(overview) => overview
                .rabbitmq_version
                .unwrap_or_else(|| DISCONNECTED.to_string()),
            Err(e) => {
                debug!(error = %e, "Broker version unavailable");
                DISCONNECTED.to_string()
            }
        }
    }
}

/// Health check result
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub component: String,
    pub healthy: bool,
    pub message: Option<String>,
    pub response_time_ms: Option<u64>,
}

/// Trait for components that can be health checked
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn health_check(&self) -> HealthCheckResult;

    fn component_name(&self) -> &str;
}

/// AMQP liveness
pub struct BrokerHealthCheck {
    probe: Arc<BrokerProbe>,
}

impl BrokerHealthCheck {
    pub fn new(probe: Arc<BrokerProbe>) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl HealthCheck for BrokerHealthCheck {
    async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let outcome = self.probe.is_alive().await;
        let response_time_ms = start.elapsed().as_millis() as u64;

        let (healthy, message) = match outcome {
            Ok(()) => (true, "Broker reachable".to_string()),
            Err(e) => {
                warn!(error = %e, response_time_ms, "Broker health check failed");
                (false, e.to_string())
            }
        };

        HealthCheckResult {
            component: self.component_name().to_string(),
            healthy,
            message: Some(message),
            response_time_ms: Some(response_time_ms),
        }
    }

    fn component_name(&self) -> &str {
        "amqp_broker"
    }
}

/// Management API reachability, judged by the version lookup
pub struct ManagementHealthCheck {
    probe: Arc<BrokerProbe>,
}

impl ManagementHealthCheck {
    pub fn new(probe: Arc<BrokerProbe>) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl HealthCheck for ManagementHealthCheck {
    async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let version = self.probe.version().await;
        let response_time_ms = start.elapsed().as_millis() as u64;
        let healthy = version != DISCONNECTED;

        HealthCheckResult {
            component: self.component_name().to_string(),
            healthy,
            message: Some(if healthy {
                format!("RabbitMQ {version}")
            } else {
                "Management API unreachable".to_string()
            }),
            response_time_ms: Some(response_time_ms),
        }
    }

    fn component_name(&self) -> &str {
        "management_api"
    }
}

/// Aggregated health check manager
#[derive(Default)]
pub struct HealthCheckManager {
    health_checks: Vec<Box<dyn HealthCheck>>,
}

impl HealthCheckManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_health_check(&mut self, health_check: Box<dyn HealthCheck>) {
        self.health_checks.push(health_check);
    }

    /// Run every check in registration order
    pub async fn run_health_checks(&self) -> Vec<HealthCheckResult> {
        let mut results = Vec::with_capacity(self.health_checks.len());
        for health_check in &self.health_checks {
            results.push(health_check.health_check().await);
        }
        results
    }

    /// Healthy only when every component is; no checks counts as healthy
    pub async fn calculate_overall_health(&self) -> bool {
        let results = self.run_health_checks().await;
        if results.is_empty() {
            warn!("No health checks configured - assuming healthy");
            return true;
        }

        let healthy_count = results.iter().filter(|r| r.healthy).count();
        debug!(
            healthy = healthy_count,
            total = results.len(),
            "Overall health computed"
        );
        healthy_count == results.len()
    }
}
