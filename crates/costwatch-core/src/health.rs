//! Health tracking for the collector and calculator services
//!
//! Each service reports the outcome of its latest cycle here. The operational
//! API turns the registry into `/healthz` and `/readyz` responses.

use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Last cycle finished but lost part of its input
    Degraded,
    /// Last cycle failed before doing useful work
    Unhealthy,
}

impl ComponentStatus {
    /// Status implied by the error a cycle ended with, if any
    pub fn from_cycle(error: Option<&PipelineError>) -> Self {
        match error {
            None => ComponentStatus::Healthy,
            Some(PipelineError::MetricsUnavailable(_))
            | Some(PipelineError::InvalidGroupData { .. }) => ComponentStatus::Degraded,
            Some(PipelineError::SourceUnavailable(_))
            | Some(PipelineError::StoreWriteFailed(_)) => ComponentStatus::Unhealthy,
        }
    }
}

/// Latest known state of one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub checked_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across all components; empty means healthy
    pub fn overall(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|c| c.status)
            .fold(ComponentStatus::Healthy, |worst, status| match (worst, status) {
                (ComponentStatus::Unhealthy, _) | (_, ComponentStatus::Unhealthy) => {
                    ComponentStatus::Unhealthy
                }
                (ComponentStatus::Degraded, _) | (_, ComponentStatus::Degraded) => {
                    ComponentStatus::Degraded
                }
                _ => ComponentStatus::Healthy,
            })
    }
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
    pub const COLLECTOR: &str = "collector";
    pub const CALCULATOR: &str = "calculator";
    pub const STORE: &str = "store";
}

/// Shared registry of component health
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component as healthy with no successful cycle yet
    pub async fn register(&self, name: &str) {
        self.components.write().await.insert(
            name.to_string(),
            ComponentHealth {
                status: ComponentStatus::Healthy,
                message: None,
                checked_at: Utc::now(),
                last_success_at: None,
            },
        );
    }

    /// Record the outcome of a cycle for `name`
    pub async fn record_cycle(&self, name: &str, error: Option<&PipelineError>) {
        let now = Utc::now();
        let mut components = self.components.write().await;
        let previous_success = components.get(name).and_then(|c| c.last_success_at);

        let status = ComponentStatus::from_cycle(error);
        components.insert(
            name.to_string(),
            ComponentHealth {
                status,
                message: error.map(ToString::to_string),
                checked_at: now,
                last_success_at: if error.is_none() {
                    Some(now)
                } else {
                    previous_success
                },
            },
        );
    }

    /// Mark a component unhealthy outside a cycle, e.g. a failed startup probe
    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        let mut components = self.components.write().await;
        let last_success_at = components.get(name).and_then(|c| c.last_success_at);
        components.insert(
            name.to_string(),
            ComponentHealth {
                status: ComponentStatus::Unhealthy,
                message: Some(message.into()),
                checked_at: Utc::now(),
                last_success_at,
            },
        );
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::overall(&components);
        HealthResponse { status, components }
    }

    /// Ready once started, as long as the store is reachable
    pub async fn readiness(&self) -> ReadinessResponse {
        if !*self.ready.read().await {
            return ReadinessResponse {
                ready: false,
                reason: Some("Pipeline not yet started".to_string()),
            };
        }

        let components = self.components.read().await;
        if let Some(store) = components.get(components::STORE) {
            if store.status == ComponentStatus::Unhealthy {
                return ReadinessResponse {
                    ready: false,
                    reason: store.message.clone().or_else(|| Some("Store unavailable".into())),
                };
            }
        }

        ReadinessResponse {
            ready: true,
            reason: None,
        }
    }
}
