//! Collaborator contracts for persistence.
//!
//! The engine treats domain records as read-only snapshot data behind
//! `FlowStore`, session plans as opaque bytes behind `SessionStore`, and user
//! lookup/verification as seams behind `UserDirectory`/`CredentialVerifier`.
//! In-memory implementations live in `memory`; `postgres` loads snapshots
//! from a database at startup.

use anyhow::Result;
use uuid::Uuid;

use crate::flows::models::{Flow, FlowStageBinding};
use crate::policies::{PolicyBinding, PolicyTarget, User};

pub mod memory;
pub mod postgres;

pub use memory::{
    FlowStoreBuilder, InMemoryCredentialVerifier, InMemoryFlowStore, InMemorySessionStore,
    InMemoryUserDirectory,
};

/// Read-only flow definition snapshot.
pub trait FlowStore: Send + Sync {
    fn flow_by_slug(&self, slug: &str) -> Option<Flow>;
    /// Stage bindings for a flow, sorted by `order` ascending with creation
    /// order as the stable tie-break.
    fn stage_bindings(&self, flow_uuid: &Uuid) -> Vec<FlowStageBinding>;
    /// Policy bindings attached to a target, sorted the same way. Disabled
    /// bindings are included; the engine filters them.
    fn policy_bindings(&self, target: &PolicyTarget) -> Vec<PolicyBinding>;
}

/// Session-keyed plan persistence. Plans are stored as opaque bytes; the
/// encoding belongs to `FlowPlan`.
pub trait SessionStore: Send + Sync {
    /// # Errors
    /// Returns an error when the backing store is unavailable.
    fn get(&self, session_id: &str) -> Result<Option<Vec<u8>>>;
    /// # Errors
    /// Returns an error when the backing store is unavailable.
    fn put(&self, session_id: &str, plan: Vec<u8>) -> Result<()>;
    /// # Errors
    /// Returns an error when the backing store is unavailable.
    fn delete(&self, session_id: &str) -> Result<()>;
}

/// User lookup used by the identification stage.
pub trait UserDirectory: Send + Sync {
    /// Resolve a username or email to a user.
    fn find_by_identifier(&self, identifier: &str) -> Option<User>;
}

/// Credential check used by the password stage. Hashing backends are an
/// external collaborator; implementations only answer pass/fail.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, user: &User, password: &str) -> bool;
}
