//! Telemetry for reporting provisioning lifecycle events
//!
//! Every event is logged locally. When a collector URL is configured the event
//! is also POSTed there as JSON; delivery failures are logged and otherwise
//! ignored so telemetry can never fail a provisioning run.

use crate::config::ContainerEnv;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// All telemetry events emitted by the init components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TelemetryEvent {
    /// Provisioning run started
    ProvisionStarted { node: String, target: String },

    /// Provisioning skipped because a previous run completed
    ProvisionSkipped { node: String, reason: String },

    /// One user was created or updated
    UserProvisioned {
        node: String,
        user: String,
        database: String,
        outcome: String,
    },

    /// All steps completed
    ProvisionCompleted {
        node: String,
        duration_ms: u64,
        users_provisioned: Vec<String>,
    },

    /// Provisioning failed
    ProvisionFailed {
        node: String,
        error: String,
        phase: String,
    },
}

impl TelemetryEvent {
    /// Get the event type name used by the collector.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ProvisionStarted { .. } => "MONGO_INIT_STARTED",
            Self::ProvisionSkipped { .. } => "MONGO_INIT_SKIPPED",
            Self::UserProvisioned { .. } => "MONGO_INIT_USER_PROVISIONED",
            Self::ProvisionCompleted { .. } => "MONGO_INIT_COMPLETED",
            Self::ProvisionFailed { .. } => "MONGO_INIT_FAILED",
        }
    }

    /// Convert event to a human-readable message.
    pub fn message(&self) -> String {
        match self {
            Self::ProvisionStarted { node, target } => {
                format!("Provisioning started on {} against {}", node, target)
            }
            Self::ProvisionSkipped { node, reason } => {
                format!("Provisioning skipped on {} ({})", node, reason)
            }
            Self::UserProvisioned {
                node,
                user,
                database,
                outcome,
            } => {
                format!("{} user {} in {} on {}", outcome, user, database, node)
            }
            Self::ProvisionCompleted {
                node,
                duration_ms,
                users_provisioned,
            } => {
                format!(
                    "Provisioning completed on {} in {}ms ({} users)",
                    node,
                    duration_ms,
                    users_provisioned.len()
                )
            }
            Self::ProvisionFailed { node, error, phase } => {
                format!("Provisioning failed on {} during {}: {}", node, phase, error)
            }
        }
    }
}

/// Telemetry client.
#[derive(Clone)]
pub struct Telemetry {
    client: Client,
    endpoint: Option<String>,
    run_id: Uuid,
    component: String,
}

impl Telemetry {
    /// Create a telemetry client from environment variables.
    pub fn from_env(component: &str) -> Self {
        Self::new(component, ContainerEnv::telemetry_url())
    }

    /// Create a telemetry client with an explicit collector endpoint.
    pub fn new(component: &str, endpoint: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            endpoint,
            run_id: Uuid::new_v4(),
            component: component.to_string(),
        }
    }

    /// Identifier shared by every event of this run.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Build the JSON body posted to the collector.
    pub fn payload(&self, event: &TelemetryEvent) -> serde_json::Value {
        json!({
            "event": event.event_type(),
            "message": event.message(),
            "component": self.component,
            "runId": self.run_id.to_string(),
            "timestamp": Utc::now().to_rfc3339(),
            "data": event,
        })
    }

    /// Log an event and deliver it to the collector, if any.
    pub async fn send(&self, event: TelemetryEvent) {
        info!(event = %event.event_type(), "{}", event.message());

        let Some(endpoint) = &self.endpoint else {
            return;
        };

        match self
            .client
            .post(endpoint)
            .json(&self.payload(&event))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => {
                warn!("Telemetry got status {}", resp.status());
            }
            Err(e) => {
                warn!("Telemetry send failed: {}", e);
            }
        }
    }
}
