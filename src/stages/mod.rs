//! Stage capability contract and component registry.
//!
//! Stages are dispatched through a component-string registry populated at
//! process start; the executor never hard-codes stage kinds. Heavyweight
//! authenticators (TOTP, WebAuthn, captcha) are out of scope; the built-ins
//! here are enough to run authentication flows end to end.

use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::flows::challenge::{Challenge, ValidationOutcome};
use crate::flows::models::Flow;
use crate::flows::plan::FlowPlan;
use crate::storage::{CredentialVerifier, UserDirectory};

mod deny;
mod identification;
mod password;
mod user_login;

pub use deny::DenyStage;
pub use identification::IdentificationStage;
pub use password::PasswordStage;
pub use user_login::UserLoginStage;

/// Stable component discriminators for the built-in stages.
pub mod components {
    pub const IDENTIFICATION: &str = "pg-stage-identification";
    pub const PASSWORD: &str = "pg-stage-password";
    pub const DENY: &str = "pg-stage-deny";
    pub const USER_LOGIN: &str = "pg-stage-user-login";
}

/// Capability set every concrete stage implements: describe the input it
/// needs, and validate what came back.
pub trait StageView: Send + Sync {
    /// Build the challenge for the current plan state.
    ///
    /// # Errors
    /// Implementations may fail; the executor logs the cause and degrades,
    /// it never surfaces it to the end user.
    fn produce_challenge(&self, flow: &Flow, plan: &FlowPlan) -> Result<Challenge>;

    /// Validate submitted data against the current plan state.
    ///
    /// # Errors
    /// An error is treated as an invalid response by the executor.
    fn validate_response(&self, plan: &FlowPlan, data: &Value) -> Result<ValidationOutcome>;
}

/// Component string to stage implementation map.
#[derive(Clone, Default)]
pub struct StageRegistry {
    views: HashMap<String, Arc<dyn StageView>>,
}

impl StageRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with all built-in stages wired to the given collaborators.
    #[must_use]
    pub fn with_defaults(
        users: Arc<dyn UserDirectory>,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(
            components::IDENTIFICATION,
            Arc::new(IdentificationStage::new(users)),
        );
        registry.register(components::PASSWORD, Arc::new(PasswordStage::new(verifier)));
        registry.register(components::DENY, Arc::new(DenyStage));
        registry.register(components::USER_LOGIN, Arc::new(UserLoginStage));
        registry
    }

    pub fn register(&mut self, component: impl Into<String>, view: Arc<dyn StageView>) {
        self.views.insert(component.into(), view);
    }

    #[must_use]
    pub fn get(&self, component: &str) -> Option<Arc<dyn StageView>> {
        self.views.get(component).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryCredentialVerifier, InMemoryUserDirectory};

    #[test]
    fn default_registry_covers_builtin_components() {
        let registry = StageRegistry::with_defaults(
            Arc::new(InMemoryUserDirectory::new()),
            Arc::new(InMemoryCredentialVerifier::new()),
        );
        for component in [
            components::IDENTIFICATION,
            components::PASSWORD,
            components::DENY,
            components::USER_LOGIN,
        ] {
            assert!(registry.get(component).is_some(), "missing {component}");
        }
        assert!(registry.get("pg-stage-unknown").is_none());
    }
}
