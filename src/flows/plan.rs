//! Per-session materialization of a flow.
//!
//! A plan is plain, serializable data: the ordered sequence of stage bindings
//! still to execute plus the shared context map. It crosses the session-store
//! boundary between every challenge/response round trip, so it carries a
//! schema version to detect stale formats.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};

use crate::flows::error::FlowError;
use crate::flows::models::FlowStageBinding;
use crate::policies::User;

pub const PLAN_VERSION: u32 = 1;

/// User object resolved by an earlier stage (usually identification).
pub const PLAN_CONTEXT_PENDING_USER: &str = "pending_user";
/// Raw identifier the user entered, kept even when no user matched.
pub const PLAN_CONTEXT_PENDING_USER_IDENTIFIER: &str = "pending_user_identifier";
/// Application that triggered this flow, used in title placeholders.
pub const PLAN_CONTEXT_APPLICATION: &str = "application";
/// Where to send the user when the plan is exhausted.
pub const PLAN_CONTEXT_REDIRECT: &str = "redirect";
/// Set by the user-login stage once the pending user is committed.
pub const PLAN_CONTEXT_AUTHENTICATED_USER: &str = "authenticated_user";

const DEFAULT_REDIRECT: &str = "/";

/// The context map is the only channel for inter-stage data passing; stages
/// must not assume ordering of unrelated context keys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlowPlan {
    version: u32,
    pub flow_slug: String,
    pub bindings: VecDeque<FlowStageBinding>,
    pub context: BTreeMap<String, Value>,
}

impl FlowPlan {
    #[must_use]
    pub fn new(flow_slug: impl Into<String>) -> Self {
        Self {
            version: PLAN_VERSION,
            flow_slug: flow_slug.into(),
            bindings: VecDeque::new(),
            context: BTreeMap::new(),
        }
    }

    pub fn append(&mut self, binding: FlowStageBinding) {
        self.bindings.push_back(binding);
    }

    #[must_use]
    pub fn front(&self) -> Option<&FlowStageBinding> {
        self.bindings.front()
    }

    pub fn pop_front(&mut self) -> Option<FlowStageBinding> {
        self.bindings.pop_front()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.context.insert(key.into(), value);
    }

    #[must_use]
    pub fn pending_user(&self) -> Option<User> {
        self.context
            .get(PLAN_CONTEXT_PENDING_USER)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn set_pending_user(&mut self, user: &User) {
        if let Ok(value) = serde_json::to_value(user) {
            self.context
                .insert(PLAN_CONTEXT_PENDING_USER.to_string(), value);
        }
    }

    #[must_use]
    pub fn pending_user_identifier(&self) -> Option<String> {
        self.context
            .get(PLAN_CONTEXT_PENDING_USER_IDENTIFIER)
            .and_then(Value::as_str)
            .map(ToString::to_string)
    }

    /// Terminal redirect target once the plan is exhausted.
    #[must_use]
    pub fn redirect_target(&self) -> String {
        self.context
            .get(PLAN_CONTEXT_REDIRECT)
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_REDIRECT)
            .to_string()
    }

    /// Encode for the session store.
    ///
    /// # Errors
    /// Returns `PlanCorrupted` when the plan cannot be encoded.
    pub fn serialize(&self) -> Result<Vec<u8>, FlowError> {
        serde_json::to_vec(self).map_err(|err| FlowError::PlanCorrupted(err.to_string()))
    }

    /// Decode a stored plan, rejecting unknown schema versions.
    ///
    /// # Errors
    /// Returns `PlanCorrupted` on malformed bytes or a version mismatch.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, FlowError> {
        let plan: Self =
            serde_json::from_slice(bytes).map_err(|err| FlowError::PlanCorrupted(err.to_string()))?;
        if plan.version != PLAN_VERSION {
            return Err(FlowError::PlanCorrupted(format!(
                "unsupported plan version {}",
                plan.version
            )));
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::models::Stage;
    use serde_json::json;

    fn plan_with_stages() -> FlowPlan {
        let mut plan = FlowPlan::new("default-login");
        plan.append(FlowStageBinding::new(
            Stage::in_memory("pg-stage-identification"),
            0,
        ));
        plan.append(FlowStageBinding::new(Stage::in_memory("pg-stage-password"), 1));
        plan.insert(PLAN_CONTEXT_PENDING_USER_IDENTIFIER, json!("alice"));
        plan
    }

    #[test]
    fn round_trip_preserves_sequence_and_context() {
        let plan = plan_with_stages();
        let bytes = plan.serialize().unwrap();
        let parsed = FlowPlan::deserialize(&bytes).unwrap();
        assert_eq!(parsed, plan);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.pending_user_identifier().as_deref(), Some("alice"));
    }

    #[test]
    fn pop_front_is_fifo() {
        let mut plan = plan_with_stages();
        let first = plan.pop_front().unwrap();
        assert_eq!(first.stage.component, "pg-stage-identification");
        let second = plan.pop_front().unwrap();
        assert_eq!(second.stage.component, "pg-stage-password");
        assert!(plan.is_empty());
    }

    #[test]
    fn malformed_bytes_are_rejected() {
        let err = FlowPlan::deserialize(b"not a plan").unwrap_err();
        assert!(matches!(err, FlowError::PlanCorrupted(_)));
    }

    #[test]
    fn stale_version_is_rejected() {
        let mut value = serde_json::to_value(plan_with_stages()).unwrap();
        value["version"] = json!(0);
        let bytes = serde_json::to_vec(&value).unwrap();
        let err = FlowPlan::deserialize(&bytes).unwrap_err();
        assert!(matches!(err, FlowError::PlanCorrupted(message) if message.contains("version 0")));
    }

    #[test]
    fn pending_user_round_trips_through_context() {
        let mut plan = FlowPlan::new("default-login");
        assert!(plan.pending_user().is_none());
        let user = User::new("alice", "alice@example.com");
        plan.set_pending_user(&user);
        assert_eq!(plan.pending_user(), Some(user));
    }

    #[test]
    fn redirect_target_defaults_to_root() {
        let mut plan = FlowPlan::new("default-login");
        assert_eq!(plan.redirect_target(), "/");
        plan.insert(PLAN_CONTEXT_REDIRECT, json!("/accounts"));
        assert_eq!(plan.redirect_target(), "/accounts");
    }
}
