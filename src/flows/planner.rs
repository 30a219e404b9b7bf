//! Turning a flow's bindings into a concrete per-session plan.

use tracing::{debug, warn};

use crate::events::{Event, EventKind};
use crate::flows::error::FlowError;
use crate::flows::models::Flow;
use crate::flows::plan::FlowPlan;
use crate::flows::FlowServices;
use crate::policies::{PolicyEngine, PolicyRequest};

/// Consumes a flow's stage bindings, gates them through the policy engine,
/// and produces the ordered plan for one session.
pub struct FlowPlanner {
    flow: Flow,
    services: FlowServices,
}

impl FlowPlanner {
    #[must_use]
    pub fn new(flow: Flow, services: FlowServices) -> Self {
        Self { flow, services }
    }

    /// Build a plan for the user behind `request`. The request context is the
    /// caller-supplied initial context and becomes the plan context verbatim;
    /// no other state leaks in.
    ///
    /// # Errors
    /// `FlowNonApplicable` when the flow's own policies fail; the caller
    /// surfaces this as "flow not available", never a stack trace.
    pub async fn plan(&self, request: PolicyRequest) -> Result<FlowPlan, FlowError> {
        debug!(flow = %self.flow, user = request.user.username, "building flow plan");

        let flow_bindings = self.services.flows.policy_bindings(&self.flow.policy_target());
        let mut engine = PolicyEngine::new(
            self.flow.to_string(),
            self.flow.policy_engine_mode,
            flow_bindings,
            request.clone(),
            self.services.policies.clone(),
            self.services.events.clone(),
        );
        let result = engine.build().await;
        if !result.passing {
            warn!(
                flow = %self.flow,
                user = request.user.username,
                messages = ?result.messages,
                "flow not applicable to user"
            );
            self.services.events.notify(
                Event::new(EventKind::FlowDenied, "flow access denied at planning time")
                    .with_flow(self.flow.slug.clone())
                    .with_username(request.user.username.clone()),
            );
            return Err(FlowError::FlowNonApplicable {
                messages: result.messages.clone(),
            });
        }
        // Thread context writes made by flow-level policies into the
        // per-binding checks below.
        let mut policy_request = engine.request().clone();

        let mut plan = FlowPlan::new(self.flow.slug.clone());
        plan.context = request.context;

        for binding in self.services.flows.stage_bindings(&self.flow.flow_uuid) {
            if binding.evaluate_on_plan {
                let bindings = self.services.flows.policy_bindings(&binding.policy_target());
                let mut engine = PolicyEngine::new(
                    binding.to_string(),
                    binding.policy_engine_mode,
                    bindings,
                    policy_request.clone(),
                    self.services.policies.clone(),
                    self.services.events.clone(),
                );
                let result = engine.build().await;
                if !result.passing {
                    debug!(
                        flow = %self.flow,
                        binding = %binding,
                        messages = ?result.messages,
                        "binding not applicable, omitted from plan"
                    );
                    policy_request = engine.request().clone();
                    continue;
                }
                policy_request = engine.request().clone();
            }
            plan.append(binding);
        }

        debug!(flow = %self.flow, stages = plan.len(), "flow plan built");
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::flows::models::{FlowDesignation, FlowStageBinding, Stage};
    use crate::policies::{PolicyBinding, PolicyRegistry, StaticPolicy, User};
    use crate::stages::StageRegistry;
    use crate::storage::{FlowStoreBuilder, InMemoryFlowStore, InMemorySessionStore};
    use std::sync::Arc;

    fn services(store: InMemoryFlowStore, events: Arc<CollectingEventSink>) -> FlowServices {
        let mut policies = PolicyRegistry::new();
        policies.register("always-pass", Arc::new(StaticPolicy::passing()));
        policies.register("always-fail", Arc::new(StaticPolicy::failing("denied")));
        FlowServices {
            flows: Arc::new(store),
            sessions: Arc::new(InMemorySessionStore::new()),
            stages: Arc::new(StageRegistry::new()),
            policies: Arc::new(policies),
            events,
        }
    }

    fn request() -> PolicyRequest {
        PolicyRequest::new(User::new("alice", "alice@example.com"))
    }

    fn login_flow() -> Flow {
        Flow::new(
            "Login",
            "login",
            "Welcome",
            FlowDesignation::Authentication,
        )
    }

    #[tokio::test]
    async fn plan_preserves_binding_order() {
        let flow = login_flow();
        let flow_uuid = flow.flow_uuid;
        let store = FlowStoreBuilder::new()
            .with_flow(flow.clone())
            .with_stage_binding(
                flow_uuid,
                FlowStageBinding::new(Stage::in_memory("pg-stage-password"), 1),
            )
            .with_stage_binding(
                flow_uuid,
                FlowStageBinding::new(Stage::in_memory("pg-stage-identification"), 0),
            )
            .build();
        let planner = FlowPlanner::new(flow, services(store, Arc::new(CollectingEventSink::new())));
        let plan = planner.plan(request()).await.unwrap();
        let components: Vec<&str> = plan
            .bindings
            .iter()
            .map(|binding| binding.stage.component.as_str())
            .collect();
        assert_eq!(
            components,
            vec!["pg-stage-identification", "pg-stage-password"]
        );
    }

    #[tokio::test]
    async fn failing_flow_policy_is_non_applicable() {
        let flow = login_flow();
        let store = FlowStoreBuilder::new()
            .with_flow(flow.clone())
            .with_policy_binding(
                flow.policy_target(),
                PolicyBinding::for_policy("always-fail", 0),
            )
            .build();
        let events = Arc::new(CollectingEventSink::new());
        let planner = FlowPlanner::new(flow, services(store, events.clone()));
        let err = planner.plan(request()).await.unwrap_err();
        let FlowError::FlowNonApplicable { messages } = err else {
            panic!("expected FlowNonApplicable");
        };
        assert_eq!(messages, vec!["denied".to_string()]);
        assert_eq!(events.kinds(), vec![crate::events::EventKind::FlowDenied]);
    }

    #[tokio::test]
    async fn failing_binding_policy_omits_the_stage() {
        let flow = login_flow();
        let flow_uuid = flow.flow_uuid;
        let gated = FlowStageBinding::new(Stage::in_memory("pg-stage-consent"), 0);
        let open = FlowStageBinding::new(Stage::in_memory("pg-stage-password"), 1);
        let store = FlowStoreBuilder::new()
            .with_flow(flow.clone())
            .with_policy_binding(
                gated.policy_target(),
                PolicyBinding::for_policy("always-fail", 0),
            )
            .with_stage_binding(flow_uuid, gated)
            .with_stage_binding(flow_uuid, open)
            .build();
        let planner = FlowPlanner::new(flow, services(store, Arc::new(CollectingEventSink::new())));
        let plan = planner.plan(request()).await.unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.front().unwrap().stage.component, "pg-stage-password");
    }

    #[tokio::test]
    async fn negated_passing_policy_omits_the_stage() {
        // A negated always-pass policy is effectively failing.
        let flow = login_flow();
        let flow_uuid = flow.flow_uuid;
        let gated = FlowStageBinding::new(Stage::in_memory("pg-stage-consent"), 0);
        let store = FlowStoreBuilder::new()
            .with_flow(flow.clone())
            .with_policy_binding(
                gated.policy_target(),
                PolicyBinding::for_policy("always-pass", 0).with_negate(true),
            )
            .with_stage_binding(flow_uuid, gated)
            .build();
        let planner = FlowPlanner::new(flow, services(store, Arc::new(CollectingEventSink::new())));
        let plan = planner.plan(request()).await.unwrap();
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn evaluate_on_plan_false_skips_the_check() {
        let flow = login_flow();
        let flow_uuid = flow.flow_uuid;
        let binding = FlowStageBinding::new(Stage::in_memory("pg-stage-consent"), 0)
            .with_evaluate_on_plan(false);
        let store = FlowStoreBuilder::new()
            .with_flow(flow.clone())
            .with_policy_binding(
                binding.policy_target(),
                PolicyBinding::for_policy("always-fail", 0),
            )
            .with_stage_binding(flow_uuid, binding)
            .build();
        let planner = FlowPlanner::new(flow, services(store, Arc::new(CollectingEventSink::new())));
        let plan = planner.plan(request()).await.unwrap();
        assert_eq!(plan.len(), 1);
    }

    #[tokio::test]
    async fn initial_context_seeds_the_plan() {
        let flow = login_flow();
        let store = FlowStoreBuilder::new().with_flow(flow.clone()).build();
        let planner = FlowPlanner::new(flow, services(store, Arc::new(CollectingEventSink::new())));
        let mut request = request();
        request
            .context
            .insert("application".to_string(), serde_json::json!("grafana"));
        let plan = planner.plan(request).await.unwrap();
        assert_eq!(plan.context["application"], serde_json::json!("grafana"));
    }
}
