//! Identification stage: resolve who is trying to authenticate.

use anyhow::Result;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::flows::challenge::{Challenge, ChallengeField, ErrorDetail, ValidationOutcome};
use crate::flows::models::Flow;
use crate::flows::plan::{
    FlowPlan, PLAN_CONTEXT_PENDING_USER, PLAN_CONTEXT_PENDING_USER_IDENTIFIER,
};
use crate::stages::{components, StageView};
use crate::storage::UserDirectory;

const UID_FIELD: &str = "uid_field";
const FAILURE_MESSAGE: &str = "Failed to authenticate.";

pub struct IdentificationStage {
    users: Arc<dyn UserDirectory>,
    /// When set, an unknown identifier is accepted and only the identifier is
    /// recorded, so the next stage fails without revealing whether the
    /// account exists.
    pretend_user_exists: bool,
}

impl IdentificationStage {
    #[must_use]
    pub fn new(users: Arc<dyn UserDirectory>) -> Self {
        Self {
            users,
            pretend_user_exists: false,
        }
    }

    #[must_use]
    pub fn with_pretend_user_exists(mut self, pretend: bool) -> Self {
        self.pretend_user_exists = pretend;
        self
    }
}

impl StageView for IdentificationStage {
    fn produce_challenge(&self, _flow: &Flow, _plan: &FlowPlan) -> Result<Challenge> {
        Ok(Challenge::new(components::IDENTIFICATION)
            .with_field(ChallengeField::text(UID_FIELD, "Username or email")))
    }

    fn validate_response(&self, _plan: &FlowPlan, data: &Value) -> Result<ValidationOutcome> {
        let Some(identifier) = data
            .get(UID_FIELD)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|identifier| !identifier.is_empty())
        else {
            return Ok(ValidationOutcome::rejected(
                UID_FIELD,
                ErrorDetail::required(),
            ));
        };

        let mut context_updates = BTreeMap::new();
        context_updates.insert(
            PLAN_CONTEXT_PENDING_USER_IDENTIFIER.to_string(),
            json!(identifier),
        );

        match self.users.find_by_identifier(identifier) {
            Some(user) => {
                debug!(username = user.username, "identified pending user");
                context_updates.insert(
                    PLAN_CONTEXT_PENDING_USER.to_string(),
                    serde_json::to_value(&user)?,
                );
                Ok(ValidationOutcome::Accepted { context_updates })
            }
            None if self.pretend_user_exists => {
                debug!(identifier, "no user matched, pretending one exists");
                Ok(ValidationOutcome::Accepted { context_updates })
            }
            None => {
                debug!(identifier, "no user matched identifier");
                Ok(ValidationOutcome::rejected(
                    UID_FIELD,
                    ErrorDetail::invalid(FAILURE_MESSAGE),
                ))
            }
        }
    }
}
