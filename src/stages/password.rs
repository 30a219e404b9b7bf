//! Password stage: verify the pending user's credential.

use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::flows::challenge::{
    Challenge, ChallengeField, ErrorDetail, ValidationOutcome, NON_FIELD_ERRORS,
};
use crate::flows::models::Flow;
use crate::flows::plan::FlowPlan;
use crate::stages::{components, StageView};
use crate::storage::CredentialVerifier;

const PASSWORD_FIELD: &str = "password";

pub struct PasswordStage {
    verifier: Arc<dyn CredentialVerifier>,
}

impl PasswordStage {
    #[must_use]
    pub fn new(verifier: Arc<dyn CredentialVerifier>) -> Self {
        Self { verifier }
    }
}

impl StageView for PasswordStage {
    fn produce_challenge(&self, _flow: &Flow, plan: &FlowPlan) -> Result<Challenge> {
        let mut challenge = Challenge::new(components::PASSWORD)
            .with_field(ChallengeField::password(PASSWORD_FIELD, "Password"));
        // Password managers key off the identifier shown here.
        if let Some(identifier) = plan.pending_user_identifier() {
            challenge = challenge.with_metadata(serde_json::json!({
                "pending_user": identifier,
            }));
        }
        Ok(challenge)
    }

    fn validate_response(&self, plan: &FlowPlan, data: &Value) -> Result<ValidationOutcome> {
        let Some(password) = data
            .get(PASSWORD_FIELD)
            .and_then(Value::as_str)
            .filter(|password| !password.is_empty())
        else {
            return Ok(ValidationOutcome::rejected(
                PASSWORD_FIELD,
                ErrorDetail::required(),
            ));
        };

        // A plan that reaches this stage without identification is rejected
        // rather than errored: the flow may have been restarted underneath.
        let Some(user) = plan.pending_user() else {
            debug!("password submitted without a pending user");
            return Ok(ValidationOutcome::rejected(
                NON_FIELD_ERRORS,
                ErrorDetail::invalid("No pending user."),
            ));
        };

        if self.verifier.verify(&user, password) {
            debug!(username = user.username, "password accepted");
            Ok(ValidationOutcome::accepted())
        } else {
            debug!(username = user.username, "password rejected");
            Ok(ValidationOutcome::rejected(
                PASSWORD_FIELD,
                ErrorDetail::invalid("Invalid password."),
            ))
        }
    }
}
