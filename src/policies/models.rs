//! Policy binding data model.
//!
//! Bindings associate a policy (or a fixed pass/fail value) with a target, an
//! evaluation order, a negate flag, and a timeout. They are created by
//! administrators and read-only to the engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Default per-binding evaluation timeout.
pub const DEFAULT_BINDING_TIMEOUT: Duration = Duration::from_secs(30);

/// How results of multiple bindings on one target are combined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyEngineMode {
    /// All bindings must pass.
    #[default]
    All,
    /// At least one binding must pass.
    Any,
}

/// Object policy bindings can be attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyTarget {
    Flow(Uuid),
    StageBinding(Uuid),
}

/// What a binding evaluates. A binding either references a registered policy
/// by name or carries a fixed result; the enum rules out having both or
/// neither.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyBindingKind {
    Policy(String),
    FixedResult(bool),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyBinding {
    pub binding_uuid: Uuid,
    pub kind: PolicyBindingKind,
    /// Evaluation sequence, ascending. Ties keep creation order.
    pub order: i32,
    /// Inverts the evaluator output; messages are preserved as-is.
    pub negate: bool,
    pub enabled: bool,
    #[serde(with = "timeout_seconds")]
    pub timeout: Duration,
}

impl PolicyBinding {
    #[must_use]
    pub fn new(kind: PolicyBindingKind, order: i32) -> Self {
        Self {
            binding_uuid: Uuid::new_v4(),
            kind,
            order,
            negate: false,
            enabled: true,
            timeout: DEFAULT_BINDING_TIMEOUT,
        }
    }

    /// Binding that evaluates the registered policy `name`.
    #[must_use]
    pub fn for_policy(name: impl Into<String>, order: i32) -> Self {
        Self::new(PolicyBindingKind::Policy(name.into()), order)
    }

    /// Binding with a fixed result and no policy attached.
    #[must_use]
    pub fn fixed(passing: bool, order: i32) -> Self {
        Self::new(PolicyBindingKind::FixedResult(passing), order)
    }

    #[must_use]
    pub fn with_negate(mut self, negate: bool) -> Self {
        self.negate = negate;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Serialize binding timeouts as whole seconds, like the stored model.
mod timeout_seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let seconds = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(seconds))
    }
}
