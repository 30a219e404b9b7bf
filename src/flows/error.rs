use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    /// Flow-level policies failed at planning time. The transport layer
    /// surfaces this as a generic access-denied page, never internal detail.
    #[error("flow is not applicable to the current user")]
    FlowNonApplicable { messages: Vec<String> },
    /// A response was submitted without an active plan. Caller bug, allowed
    /// to propagate as a hard failure.
    #[error("no flow plan is active for this session")]
    NoPendingPlan,
    /// Persisted plan failed to deserialize (stale format after an upgrade).
    /// Fatal for this session only; the executor discards and replans.
    #[error("stored flow plan is corrupt: {0}")]
    PlanCorrupted(String),
    #[error("session storage failure")]
    Storage(#[source] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_user_safe() {
        let denied = FlowError::FlowNonApplicable {
            messages: vec!["internal policy detail".to_string()],
        };
        // Display must not leak policy messages.
        assert_eq!(
            denied.to_string(),
            "flow is not applicable to the current user"
        );
        assert_eq!(
            FlowError::NoPendingPlan.to_string(),
            "no flow plan is active for this session"
        );
        assert_eq!(
            FlowError::PlanCorrupted("unsupported plan version 0".to_string()).to_string(),
            "stored flow plan is corrupt: unsupported plan version 0"
        );
    }
}
