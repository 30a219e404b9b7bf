//! Aggregation of all policy bindings attached to one target.

use std::sync::Arc;
use tracing::debug;

use crate::events::EventSink;
use crate::policies::models::{PolicyBinding, PolicyEngineMode};
use crate::policies::process;
use crate::policies::types::{PolicyRequest, PolicyResult};
use crate::policies::PolicyRegistry;

/// Evaluates the bindings of a single target and combines the per-binding
/// results according to the target's engine mode. The result is computed once
/// and cached for the lifetime of the engine instance.
pub struct PolicyEngine {
    target: String,
    mode: PolicyEngineMode,
    bindings: Vec<PolicyBinding>,
    request: PolicyRequest,
    registry: Arc<PolicyRegistry>,
    events: Arc<dyn EventSink>,
    result: Option<PolicyResult>,
}

impl PolicyEngine {
    /// `bindings` must arrive sorted by `order` ascending with creation order
    /// as the stable tie-break, as the flow store returns them.
    #[must_use]
    pub fn new(
        target: impl Into<String>,
        mode: PolicyEngineMode,
        bindings: Vec<PolicyBinding>,
        request: PolicyRequest,
        registry: Arc<PolicyRegistry>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            target: target.into(),
            mode,
            bindings,
            request,
            registry,
            events,
            result: None,
        }
    }

    /// Evaluate all enabled bindings, or return the cached result.
    pub async fn build(&mut self) -> &PolicyResult {
        if self.result.is_none() {
            let result = self.evaluate().await;
            self.result = Some(result);
        }
        self.result
            .get_or_insert_with(|| PolicyResult::fail("policy engine produced no result"))
    }

    /// Cached result, if `build` has run.
    #[must_use]
    pub fn result(&self) -> Option<&PolicyResult> {
        self.result.as_ref()
    }

    /// Convenience wrapper over `build` for callers that only gate on the
    /// boolean.
    pub async fn passing(&mut self) -> bool {
        self.build().await.passing
    }

    /// Request as the last evaluated policy left it. Callers that thread the
    /// same logical context through several engine runs read it back here.
    #[must_use]
    pub fn request(&self) -> &PolicyRequest {
        &self.request
    }

    async fn evaluate(&mut self) -> PolicyResult {
        let mut results: Vec<PolicyResult> = Vec::new();
        let enabled: Vec<PolicyBinding> = self
            .bindings
            .iter()
            .filter(|binding| binding.enabled)
            .cloned()
            .collect();

        for binding in &enabled {
            let outcome =
                process::evaluate_binding(binding, &self.registry, &self.request, &self.events)
                    .await;
            // Context writes are sequenced: the next binding sees them.
            if let Some(context) = outcome.context {
                self.request.context = context;
            }
            let mut result = outcome.result;
            if binding.negate {
                result.passing = !result.passing;
            }
            result.source_binding = Some(binding.binding_uuid);
            debug!(
                target = self.target,
                binding = %binding.binding_uuid,
                passing = result.passing,
                negate = binding.negate,
                "binding evaluated"
            );
            let passing = result.passing;
            results.push(result);

            // Short-circuiting would hide sibling messages in debug runs.
            if !self.request.debug {
                match self.mode {
                    PolicyEngineMode::All if !passing => break,
                    PolicyEngineMode::Any if passing => break,
                    _ => {}
                }
            }
        }

        // A target with no bindings is unrestricted.
        if results.is_empty() {
            debug!(target = self.target, "no bindings configured, passing");
            return PolicyResult::pass();
        }

        let passing = match self.mode {
            PolicyEngineMode::All => results.iter().all(|result| result.passing),
            PolicyEngineMode::Any => results.iter().any(|result| result.passing),
        };
        let mut aggregate = PolicyResult::new(passing);
        for result in &results {
            aggregate.messages.extend(result.messages.iter().cloned());
        }
        aggregate.source_results = results;
        debug!(
            target = self.target,
            mode = ?self.mode,
            passing,
            "engine result"
        );
        aggregate
    }
}
