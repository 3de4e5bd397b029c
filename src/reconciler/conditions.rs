//! Status conditions
//!
//! Both controllers project their outcome into typed conditions merged by
//! type, the conventional `{type, status, reason, message,
//! lastTransitionTime}` shape.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Condition set on instances when every child settled.
pub const CONDITION_ALL_RESOURCES_SYNCED: &str = "AllResourcesSynced";
/// Condition set on instances when a reconcile failed outright.
pub const CONDITION_RESOURCE_SYNCED: &str = "ResourceSynced";
/// Group condition: the dependency graph built and verified.
pub const CONDITION_GRAPH_VERIFIED: &str = "GraphVerified";
/// Group condition: the composite CRD was published.
pub const CONDITION_CRD_SYNCED: &str = "CustomResourceDefinitionSynced";
/// Group condition: the per-group reconciler is registered and serving.
pub const CONDITION_RECONCILER_READY: &str = "ReconcilerReady";

/// Truth value of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// One typed condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: String,
}

impl Condition {
    pub fn new(
        condition_type: &str,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition_type: condition_type.to_string(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now().to_rfc3339(),
        }
    }

    pub fn true_(condition_type: &str, reason: impl Into<String>) -> Self {
        Self::new(condition_type, ConditionStatus::True, reason, "")
    }

    pub fn false_(
        condition_type: &str,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(condition_type, ConditionStatus::False, reason, message)
    }

    pub fn unknown(condition_type: &str, reason: impl Into<String>) -> Self {
        Self::new(condition_type, ConditionStatus::Unknown, reason, "")
    }
}

/// Merge `updates` into `existing` by condition type, preserving order of
/// first appearance.
pub fn merge_conditions(existing: &mut Vec<Condition>, updates: Vec<Condition>) {
    for update in updates {
        match existing
            .iter_mut()
            .find(|c| c.condition_type == update.condition_type)
        {
            Some(current) => *current = update,
            None => existing.push(update),
        }
    }
}

/// Lifecycle state of a composite instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    InProgress,
    Active,
    Error,
    Deleting,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::InProgress => "IN_PROGRESS",
            InstanceState::Active => "ACTIVE",
            InstanceState::Error => "ERROR",
            InstanceState::Deleting => "DELETING",
        }
    }
}
