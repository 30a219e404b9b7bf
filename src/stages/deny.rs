//! Deny stage: unconditionally refuse the flow at this point.

use anyhow::Result;
use serde_json::Value;

use crate::flows::challenge::{Challenge, ErrorDetail, ValidationOutcome, NON_FIELD_ERRORS};
use crate::flows::models::Flow;
use crate::flows::plan::FlowPlan;
use crate::stages::StageView;

const DENIED_MESSAGE: &str = "Access denied.";

pub struct DenyStage;

impl StageView for DenyStage {
    fn produce_challenge(&self, _flow: &Flow, _plan: &FlowPlan) -> Result<Challenge> {
        Ok(Challenge::access_denied(DENIED_MESSAGE))
    }

    fn validate_response(&self, _plan: &FlowPlan, _data: &Value) -> Result<ValidationOutcome> {
        Ok(ValidationOutcome::rejected(
            NON_FIELD_ERRORS,
            ErrorDetail::invalid(DENIED_MESSAGE),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::challenge::COMPONENT_ACCESS_DENIED;
    use crate::flows::models::FlowDesignation;
    use serde_json::json;

    #[test]
    fn deny_stage_never_accepts() {
        let flow = Flow::new("Deny", "deny", "Denied", FlowDesignation::Authentication);
        let plan = FlowPlan::new("deny");
        let challenge = DenyStage.produce_challenge(&flow, &plan).unwrap();
        assert_eq!(challenge.component, COMPONENT_ACCESS_DENIED);
        let outcome = DenyStage.validate_response(&plan, &json!({})).unwrap();
        assert!(!outcome.is_accepted());
    }
}
