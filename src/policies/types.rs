//! Policy request and result structures.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Minimal view of a user as seen by policies and stages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub uuid: Uuid,
    pub username: String,
    pub email: String,
    pub is_active: bool,
}

impl User {
    #[must_use]
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            username: username.into(),
            email: email.into(),
            is_active: true,
        }
    }

    /// Placeholder user for requests without an authenticated session.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            uuid: Uuid::nil(),
            username: String::new(),
            email: String::new(),
            is_active: false,
        }
    }

    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.uuid.is_nil()
    }
}

/// Ephemeral request data handed to every policy in one evaluation run.
///
/// The context map is the scratch space policies use to pass data to policies
/// evaluated after them (for example a cached lookup). A fresh request is
/// created per run and discarded afterwards.
#[derive(Clone, Debug)]
pub struct PolicyRequest {
    pub user: User,
    /// Optional target object the policies are evaluated against.
    pub obj: Option<Value>,
    pub context: BTreeMap<String, Value>,
    /// Debug runs evaluate every binding so all messages are collectable.
    pub debug: bool,
}

impl PolicyRequest {
    #[must_use]
    pub fn new(user: User) -> Self {
        Self {
            user,
            obj: None,
            context: BTreeMap::new(),
            debug: false,
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: BTreeMap<String, Value>) -> Self {
        self.context = context;
        self
    }

    #[must_use]
    pub fn with_obj(mut self, obj: Value) -> Self {
        self.obj = Some(obj);
        self
    }

    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

impl fmt::Display for PolicyRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PolicyRequest user={}", self.user.username)
    }
}

/// Outcome of evaluating one policy, one binding, or a whole binding set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyResult {
    pub passing: bool,
    pub messages: Vec<String>,
    /// Binding that produced this result, attached by the engine.
    pub source_binding: Option<Uuid>,
    /// Per-binding results when this is an aggregate (engine or group).
    pub source_results: Vec<PolicyResult>,
}

impl PolicyResult {
    #[must_use]
    pub fn new(passing: bool) -> Self {
        Self {
            passing,
            messages: Vec::new(),
            source_binding: None,
            source_results: Vec::new(),
        }
    }

    #[must_use]
    pub fn pass() -> Self {
        Self::new(true)
    }

    #[must_use]
    pub fn fail(message: impl Into<String>) -> Self {
        let mut result = Self::new(false);
        result.messages.push(message.into());
        result
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }
}

impl fmt::Display for PolicyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.messages.is_empty() {
            write!(f, "PolicyResult passing={}", self.passing)
        } else {
            write!(
                f,
                "PolicyResult passing={} messages={:?}",
                self.passing, self.messages
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_user_is_inactive() {
        let user = User::anonymous();
        assert!(user.is_anonymous());
        assert!(!user.is_active);
        assert!(user.username.is_empty());
    }

    #[test]
    fn request_starts_with_empty_context() {
        let request = PolicyRequest::new(User::new("alice", "alice@example.com"));
        assert!(request.context.is_empty());
        assert!(request.obj.is_none());
        assert!(!request.debug);
    }

    #[test]
    fn result_display_includes_messages() {
        let result = PolicyResult::fail("denied");
        assert_eq!(
            result.to_string(),
            "PolicyResult passing=false messages=[\"denied\"]"
        );
        assert_eq!(PolicyResult::pass().to_string(), "PolicyResult passing=true");
    }

    #[test]
    fn result_round_trips_through_json() {
        let mut result = PolicyResult::fail("nope");
        result.source_binding = Some(Uuid::new_v4());
        result.source_results.push(PolicyResult::pass());
        let bytes = serde_json::to_vec(&result).unwrap();
        let parsed: PolicyResult = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed, result);
    }
}
