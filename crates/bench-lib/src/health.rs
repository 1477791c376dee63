//! Health tracking for the harness components
//!
//! Measurement-infrastructure problems (unreadable energy counter,
//! missing cgroup) degrade a component instead of failing the run; an
//! unreachable target marks the target component degraded while the
//! experiment moves on. Only a generator that cannot issue requests is
//! unhealthy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Running with an explicit unavailable marker in place of a measurement
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    /// Worst status of a set; healthy when empty
    pub fn worst<'a>(statuses: impl IntoIterator<Item = &'a ComponentStatus>) -> Self {
        statuses
            .into_iter()
            .copied()
            .max()
            .unwrap_or(ComponentStatus::Healthy)
    }
}

/// Last reported state of one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Epoch milliseconds of the last status change
    pub since_ms: i64,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            since_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
    /// Pipeline stage currently running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    /// HTTP load generator
    pub const GENERATOR: &str = "generator";
    /// RAPL energy counter
    pub const ENERGY: &str = "energy";
    /// cgroup CPU / memory sampler
    pub const SAMPLER: &str = "sampler";
    /// Service currently under test
    pub const TARGET: &str = "target";

    pub const ALL: [&str; 4] = [GENERATOR, ENERGY, SAMPLER, TARGET];
}

#[derive(Debug, Default)]
struct RegistryState {
    components: BTreeMap<String, ComponentHealth>,
    baseline_ready: bool,
    stage: Option<String>,
}

/// Shared, cheaply cloned view of harness health
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every harness component as healthy
    pub async fn register_all(&self) {
        for name in components::ALL {
            self.register(name).await;
        }
    }

    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Flip readiness once the idle baseline is established
    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.baseline_ready = ready;
    }

    /// Record the pipeline stage now running
    pub async fn set_stage(&self, stage: impl ToString) {
        self.state.write().await.stage = Some(stage.to_string());
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        HealthResponse {
            status: ComponentStatus::worst(state.components.values().map(|c| &c.status)),
            components: state.components.clone(),
            stage: state.stage.clone(),
        }
    }

    /// Ready after the baseline, unless a component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        let unhealthy = state
            .components
            .iter()
            .find(|(_, c)| c.status == ComponentStatus::Unhealthy);

        let reason = if !state.baseline_ready {
            Some("Baseline not yet established".to_string())
        } else if let Some((name, _)) = unhealthy {
            Some(format!("Component {name} unhealthy"))
        } else {
            None
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}
