//! Evaluation of a single policy binding.
//!
//! Each binding runs on a blocking worker, bounded by the binding's
//! configured timeout. Panics and timeouts degrade to failing results so one
//! broken policy cannot abort evaluation of its siblings.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::events::{Event, EventKind, EventSink};
use crate::policies::models::{PolicyBinding, PolicyBindingKind};
use crate::policies::types::{PolicyRequest, PolicyResult};
use crate::policies::PolicyRegistry;

/// Result of one binding evaluation plus the context as the policy left it.
///
/// The context is `None` when the policy never ran to completion (fixed
/// result, timeout, panic, unknown policy); the engine then keeps the
/// previous context untouched.
pub(crate) struct BindingOutcome {
    pub(crate) result: PolicyResult,
    pub(crate) context: Option<BTreeMap<String, Value>>,
}

impl BindingOutcome {
    fn result_only(result: PolicyResult) -> Self {
        Self {
            result,
            context: None,
        }
    }
}

/// Evaluate `binding` against `request` without applying negation; the engine
/// owns negation and provenance.
pub(crate) async fn evaluate_binding(
    binding: &PolicyBinding,
    registry: &PolicyRegistry,
    request: &PolicyRequest,
    events: &Arc<dyn EventSink>,
) -> BindingOutcome {
    let policy_name = match &binding.kind {
        PolicyBindingKind::FixedResult(passing) => {
            debug!(
                binding = %binding.binding_uuid,
                passing,
                "binding carries a fixed result, skipping evaluation"
            );
            return BindingOutcome::result_only(PolicyResult::new(*passing));
        }
        PolicyBindingKind::Policy(name) => name.clone(),
    };

    let Some(policy) = registry.get(&policy_name) else {
        warn!(
            binding = %binding.binding_uuid,
            policy = policy_name,
            "binding references an unregistered policy"
        );
        return BindingOutcome::result_only(PolicyResult::fail(format!(
            "Policy '{policy_name}' is not registered"
        )));
    };

    let mut scratch = request.clone();
    let task = tokio::task::spawn_blocking(move || {
        let result = policy.check(&mut scratch);
        (result, scratch.context)
    });

    match tokio::time::timeout(binding.timeout, task).await {
        Ok(Ok((result, context))) => BindingOutcome {
            result,
            context: Some(context),
        },
        Ok(Err(join_error)) => {
            error!(
                binding = %binding.binding_uuid,
                policy = policy_name,
                error = %join_error,
                "policy execution failed"
            );
            events.notify(
                Event::new(
                    EventKind::PolicyException,
                    format!("policy '{policy_name}' raised during evaluation"),
                )
                .with_username(request.user.username.clone()),
            );
            BindingOutcome::result_only(PolicyResult::fail(format!(
                "Policy '{policy_name}' failed to execute"
            )))
        }
        Err(_elapsed) => {
            warn!(
                binding = %binding.binding_uuid,
                policy = policy_name,
                timeout_secs = binding.timeout.as_secs(),
                "policy evaluation timed out"
            );
            events.notify(
                Event::new(
                    EventKind::PolicyException,
                    format!(
                        "policy '{policy_name}' timed out after {}s",
                        binding.timeout.as_secs()
                    ),
                )
                .with_username(request.user.username.clone()),
            );
            BindingOutcome::result_only(PolicyResult::fail(format!(
                "Policy '{policy_name}' timed out after {}s",
                binding.timeout.as_secs()
            )))
        }
    }
}
