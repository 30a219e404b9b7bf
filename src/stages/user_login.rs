//! User-login stage: commit the pending user at the end of a flow.
//!
//! Actual session issuance belongs to the transport layer; this stage only
//! records who completed the flow into the plan context.

use anyhow::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::info;

use crate::flows::challenge::{Challenge, ErrorDetail, ValidationOutcome, NON_FIELD_ERRORS};
use crate::flows::models::Flow;
use crate::flows::plan::{FlowPlan, PLAN_CONTEXT_AUTHENTICATED_USER};
use crate::stages::{components, StageView};

pub struct UserLoginStage;

impl StageView for UserLoginStage {
    fn produce_challenge(&self, _flow: &Flow, _plan: &FlowPlan) -> Result<Challenge> {
        // No input needed; the frontend auto-submits this component.
        Ok(Challenge::new(components::USER_LOGIN))
    }

    fn validate_response(&self, plan: &FlowPlan, _data: &Value) -> Result<ValidationOutcome> {
        let Some(user) = plan.pending_user() else {
            return Ok(ValidationOutcome::rejected(
                NON_FIELD_ERRORS,
                ErrorDetail::invalid("No pending user to log in."),
            ));
        };
        if !user.is_active {
            return Ok(ValidationOutcome::rejected(
                NON_FIELD_ERRORS,
                ErrorDetail::invalid("Account is not active."),
            ));
        }
        info!(username = user.username, "user completed login flow");
        let mut context_updates = BTreeMap::new();
        context_updates.insert(
            PLAN_CONTEXT_AUTHENTICATED_USER.to_string(),
            serde_json::to_value(&user)?,
        );
        Ok(ValidationOutcome::Accepted { context_updates })
    }
}
