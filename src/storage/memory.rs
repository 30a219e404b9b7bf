//! In-memory collaborator implementations, used by tests and demo mode.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::flows::models::{Flow, FlowStageBinding};
use crate::policies::{PolicyBinding, PolicyTarget, User};
use crate::storage::{CredentialVerifier, FlowStore, SessionStore, UserDirectory};

/// Immutable flow definition snapshot. Built once via `FlowStoreBuilder`,
/// then shared read-only.
#[derive(Clone, Debug, Default)]
pub struct InMemoryFlowStore {
    flows: HashMap<String, Flow>,
    stage_bindings: HashMap<Uuid, Vec<FlowStageBinding>>,
    policy_bindings: HashMap<PolicyTarget, Vec<PolicyBinding>>,
}

impl FlowStore for InMemoryFlowStore {
    fn flow_by_slug(&self, slug: &str) -> Option<Flow> {
        self.flows.get(slug).cloned()
    }

    fn stage_bindings(&self, flow_uuid: &Uuid) -> Vec<FlowStageBinding> {
        self.stage_bindings
            .get(flow_uuid)
            .cloned()
            .unwrap_or_default()
    }

    fn policy_bindings(&self, target: &PolicyTarget) -> Vec<PolicyBinding> {
        self.policy_bindings
            .get(target)
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
pub struct FlowStoreBuilder {
    store: InMemoryFlowStore,
}

impl FlowStoreBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_flow(mut self, flow: Flow) -> Self {
        self.store.flows.insert(flow.slug.clone(), flow);
        self
    }

    #[must_use]
    pub fn with_stage_binding(mut self, flow_uuid: Uuid, binding: FlowStageBinding) -> Self {
        self.store
            .stage_bindings
            .entry(flow_uuid)
            .or_default()
            .push(binding);
        self
    }

    #[must_use]
    pub fn with_policy_binding(mut self, target: PolicyTarget, binding: PolicyBinding) -> Self {
        self.store
            .policy_bindings
            .entry(target)
            .or_default()
            .push(binding);
        self
    }

    /// Finish the snapshot. Bindings are sorted by order; the sort is stable,
    /// so insertion order breaks ties.
    #[must_use]
    pub fn build(mut self) -> InMemoryFlowStore {
        for bindings in self.store.stage_bindings.values_mut() {
            bindings.sort_by_key(|binding| binding.order);
        }
        for bindings in self.store.policy_bindings.values_mut() {
            bindings.sort_by_key(|binding| binding.order);
        }
        self.store
    }
}

/// Plan storage keyed by session id. Single-process only; a production
/// deployment substitutes a shared session backend behind the same trait.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    plans: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, session_id: &str) -> Result<Option<Vec<u8>>> {
        let plans = self
            .plans
            .lock()
            .map_err(|_| anyhow!("session store lock poisoned"))?;
        Ok(plans.get(session_id).cloned())
    }

    fn put(&self, session_id: &str, plan: Vec<u8>) -> Result<()> {
        let mut plans = self
            .plans
            .lock()
            .map_err(|_| anyhow!("session store lock poisoned"))?;
        plans.insert(session_id.to_string(), plan);
        Ok(())
    }

    fn delete(&self, session_id: &str) -> Result<()> {
        let mut plans = self
            .plans
            .lock()
            .map_err(|_| anyhow!("session store lock poisoned"))?;
        plans.remove(session_id);
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryUserDirectory {
    users: Vec<User>,
}

impl InMemoryUserDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user(mut self, user: User) -> Self {
        self.users.push(user);
        self
    }
}

impl UserDirectory for InMemoryUserDirectory {
    fn find_by_identifier(&self, identifier: &str) -> Option<User> {
        self.users
            .iter()
            .find(|user| {
                user.username == identifier || user.email.eq_ignore_ascii_case(identifier)
            })
            .cloned()
    }
}

/// Plaintext comparison against seeded demo secrets. Real hashing backends
/// live behind the `CredentialVerifier` trait, outside this crate.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCredentialVerifier {
    secrets: HashMap<Uuid, String>,
}

impl InMemoryCredentialVerifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_secret(mut self, user_uuid: Uuid, password: impl Into<String>) -> Self {
        self.secrets.insert(user_uuid, password.into());
        self
    }
}

impl CredentialVerifier for InMemoryCredentialVerifier {
    fn verify(&self, user: &User, password: &str) -> bool {
        self.secrets
            .get(&user.uuid)
            .is_some_and(|secret| secret == password)
    }
}
