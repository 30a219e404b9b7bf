//! Per-session state machine advancing a flow plan one challenge/response
//! cycle at a time.
//!
//! The executor assumes single-writer access to its session's plan; the
//! transport layer serializes requests per session. Unexpected stage and
//! storage conditions degrade to retry/restart/deny outcomes at this
//! boundary; only caller bugs (posting without a plan) propagate.

use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::flows::challenge::{Challenge, ErrorDetail, ValidationOutcome, NON_FIELD_ERRORS};
use crate::flows::error::FlowError;
use crate::flows::models::{Flow, FlowStageBinding, InvalidResponseAction};
use crate::flows::plan::{FlowPlan, PLAN_CONTEXT_APPLICATION};
use crate::flows::planner::FlowPlanner;
use crate::flows::FlowServices;
use crate::policies::{PolicyEngine, PolicyRequest, User};

const ACCESS_DENIED_MESSAGE: &str = "Access denied";

/// Executor position in its lifecycle, carried in log lines and assertions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutorState {
    Planning,
    StagePending,
    StageDone,
    Restarting,
    Completed,
    Denied,
}

/// What the transport layer sends back to the client.
#[derive(Clone, Debug, PartialEq)]
pub enum ExecutorOutcome {
    /// Render this challenge and come back with a response.
    Challenge(Challenge),
    /// Flow finished; send the user here.
    Redirect(String),
    /// Access refused; render the attached denial challenge.
    Denied(Challenge),
}

pub struct FlowExecutor {
    flow: Flow,
    session_id: String,
    services: FlowServices,
}

impl FlowExecutor {
    #[must_use]
    pub fn new(flow: Flow, session_id: impl Into<String>, services: FlowServices) -> Self {
        Self {
            flow,
            session_id: session_id.into(),
            services,
        }
    }

    /// Produce the current challenge, planning first when the session has no
    /// plan yet.
    ///
    /// # Errors
    /// Session storage failures; policy denial is an outcome, not an error.
    pub async fn get(&self, user: &User) -> Result<ExecutorOutcome, FlowError> {
        let plan = match self.load_plan()? {
            Some(plan) => plan,
            None => {
                debug!(flow = %self.flow, state = ?ExecutorState::Planning, "no plan in session, planning");
                match self.build_plan(user, BTreeMap::new()).await {
                    Ok(plan) => plan,
                    Err(FlowError::FlowNonApplicable { messages }) => {
                        return Ok(self.denied(&messages));
                    }
                    Err(err) => return Err(err),
                }
            }
        };
        self.present(plan, user).await
    }

    /// Validate a submitted response against the current stage and advance.
    ///
    /// # Errors
    /// `NoPendingPlan` when no plan is active (caller bug), or session
    /// storage failures.
    pub async fn post(&self, user: &User, data: &Value) -> Result<ExecutorOutcome, FlowError> {
        let Some(mut plan) = self.load_plan()? else {
            return Err(FlowError::NoPendingPlan);
        };
        let Some(binding) = plan.front().cloned() else {
            return self.flow_done(&plan);
        };

        let outcome = match self.services.stages.get(&binding.stage.component) {
            Some(view) => match view.validate_response(&plan, data) {
                Ok(outcome) => outcome,
                Err(err) => {
                    // Stage bugs degrade to an invalid response; the cause
                    // stays in the logs, not in the user's browser.
                    error!(
                        flow = %self.flow,
                        binding = %binding,
                        error = %err,
                        "stage validator raised, treating response as invalid"
                    );
                    self.services.events.notify(
                        Event::new(EventKind::StageException, format!("{}: validator error", binding))
                            .with_flow(self.flow.slug.clone())
                            .with_username(user.username.clone()),
                    );
                    ValidationOutcome::rejected(
                        NON_FIELD_ERRORS,
                        ErrorDetail::invalid("Unexpected error, please try again."),
                    )
                }
            },
            None => {
                error!(
                    flow = %self.flow,
                    component = binding.stage.component,
                    "no stage registered for component"
                );
                self.services.events.notify(
                    Event::new(
                        EventKind::StageException,
                        format!("unknown stage component {}", binding.stage.component),
                    )
                    .with_flow(self.flow.slug.clone()),
                );
                return Ok(ExecutorOutcome::Challenge(Challenge::access_denied(
                    ACCESS_DENIED_MESSAGE,
                )));
            }
        };

        match outcome {
            ValidationOutcome::Accepted { context_updates } => {
                for (key, value) in context_updates {
                    plan.context.insert(key, value);
                }
                plan.pop_front();
                debug!(
                    flow = %self.flow,
                    binding = %binding,
                    state = ?ExecutorState::StageDone,
                    remaining = plan.len(),
                    "stage completed"
                );
                self.present(plan, user).await
            }
            ValidationOutcome::Rejected { field_errors } => {
                match binding.invalid_response_action {
                    InvalidResponseAction::Retry => {
                        debug!(flow = %self.flow, binding = %binding, "invalid response, retrying stage");
                        let mut challenge = self.challenge_for(&binding, &plan);
                        challenge.response_errors = field_errors;
                        self.store_plan(&plan)?;
                        Ok(ExecutorOutcome::Challenge(challenge))
                    }
                    InvalidResponseAction::Restart
                    | InvalidResponseAction::RestartWithContext => {
                        let keep_context = binding.invalid_response_action
                            == InvalidResponseAction::RestartWithContext;
                        debug!(
                            flow = %self.flow,
                            binding = %binding,
                            keep_context,
                            state = ?ExecutorState::Restarting,
                            "invalid response, restarting flow"
                        );
                        self.restart(user, plan, keep_context).await
                    }
                }
            }
        }
    }

    /// Discard the current plan and replan from scratch, optionally carrying
    /// the old context over as the new initial context.
    async fn restart(
        &self,
        user: &User,
        plan: FlowPlan,
        keep_context: bool,
    ) -> Result<ExecutorOutcome, FlowError> {
        self.delete_plan();
        let initial_context = if keep_context {
            plan.context
        } else {
            BTreeMap::new()
        };
        match self.build_plan(user, initial_context).await {
            Ok(new_plan) => self.present(new_plan, user).await,
            Err(FlowError::FlowNonApplicable { messages }) => Ok(self.denied(&messages)),
            Err(err) => Err(err),
        }
    }

    /// Walk the plan front: apply presentation-time policy re-checks, detect
    /// completion, and issue the current stage's challenge.
    async fn present(
        &self,
        mut plan: FlowPlan,
        user: &User,
    ) -> Result<ExecutorOutcome, FlowError> {
        loop {
            let Some(binding) = plan.front().cloned() else {
                return self.flow_done(&plan);
            };

            // Presentation-time re-check. A failing result skips the entry,
            // consistent with planning-time filtering.
            if binding.re_evaluate_policies && !self.re_evaluate(&binding, &plan, user).await {
                info!(
                    flow = %self.flow,
                    binding = %binding,
                    "re-evaluation failed, skipping stage"
                );
                self.services.events.notify(
                    Event::new(
                        EventKind::StageSkipped,
                        format!("{}: policies failed at presentation time", binding),
                    )
                    .with_flow(self.flow.slug.clone())
                    .with_username(user.username.clone()),
                );
                plan.pop_front();
                continue;
            }

            debug!(
                flow = %self.flow,
                binding = %binding,
                state = ?ExecutorState::StagePending,
                "issuing stage challenge"
            );
            let challenge = self.challenge_for(&binding, &plan);
            self.store_plan(&plan)?;
            return Ok(ExecutorOutcome::Challenge(challenge));
        }
    }

    async fn re_evaluate(&self, binding: &FlowStageBinding, plan: &FlowPlan, user: &User) -> bool {
        let bindings = self.services.flows.policy_bindings(&binding.policy_target());
        let request = PolicyRequest::new(user.clone()).with_context(plan.context.clone());
        let mut engine = PolicyEngine::new(
            binding.to_string(),
            binding.policy_engine_mode,
            bindings,
            request,
            self.services.policies.clone(),
            self.services.events.clone(),
        );
        engine.passing().await
    }

    /// Build the challenge for a binding, degrading to an access-denied
    /// challenge when the stage is unknown or its construction fails.
    fn challenge_for(&self, binding: &FlowStageBinding, plan: &FlowPlan) -> Challenge {
        let Some(view) = self.services.stages.get(&binding.stage.component) else {
            error!(
                flow = %self.flow,
                component = binding.stage.component,
                "no stage registered for component"
            );
            self.services.events.notify(
                Event::new(
                    EventKind::StageException,
                    format!("unknown stage component {}", binding.stage.component),
                )
                .with_flow(self.flow.slug.clone()),
            );
            return Challenge::access_denied(ACCESS_DENIED_MESSAGE);
        };
        match view.produce_challenge(&self.flow, plan) {
            Ok(mut challenge) => {
                if challenge.title.is_none() {
                    challenge.title = Some(self.format_title(plan));
                }
                challenge
            }
            Err(err) => {
                error!(
                    flow = %self.flow,
                    binding = %binding,
                    error = %err,
                    "stage failed to produce a challenge"
                );
                self.services.events.notify(
                    Event::new(
                        EventKind::StageException,
                        format!("{}: challenge construction failed", binding),
                    )
                    .with_flow(self.flow.slug.clone()),
                );
                Challenge::access_denied(ACCESS_DENIED_MESSAGE)
            }
        }
    }

    /// Replace `{app}` in the flow title with the originating application.
    fn format_title(&self, plan: &FlowPlan) -> String {
        let app = plan
            .context
            .get(PLAN_CONTEXT_APPLICATION)
            .and_then(Value::as_str)
            .unwrap_or_default();
        self.flow.title.replace("{app}", app)
    }

    fn flow_done(&self, plan: &FlowPlan) -> Result<ExecutorOutcome, FlowError> {
        let target = plan.redirect_target();
        info!(
            flow = %self.flow,
            state = ?ExecutorState::Completed,
            redirect = target,
            "flow plan exhausted"
        );
        self.delete_plan();
        Ok(ExecutorOutcome::Redirect(target))
    }

    fn denied(&self, messages: &[String]) -> ExecutorOutcome {
        debug!(flow = %self.flow, state = ?ExecutorState::Denied, ?messages, "flow denied");
        self.delete_plan();
        // Policy messages are diagnostics for operators, not for the client.
        ExecutorOutcome::Denied(Challenge::access_denied(ACCESS_DENIED_MESSAGE))
    }

    /// Load the session's plan. A plan that fails to decode, or that belongs
    /// to a different flow, is discarded so the session replans instead of
    /// crashing.
    fn load_plan(&self) -> Result<Option<FlowPlan>, FlowError> {
        let Some(bytes) = self
            .services
            .sessions
            .get(&self.session_id)
            .map_err(FlowError::Storage)?
        else {
            return Ok(None);
        };
        match FlowPlan::deserialize(&bytes) {
            Ok(plan) if plan.flow_slug == self.flow.slug => Ok(Some(plan)),
            Ok(plan) => {
                debug!(
                    flow = %self.flow,
                    stored_for = plan.flow_slug,
                    "session plan belongs to another flow, discarding"
                );
                self.delete_plan();
                Ok(None)
            }
            Err(err) => {
                warn!(flow = %self.flow, error = %err, "stored plan is corrupt, discarding");
                self.services.events.notify(
                    Event::new(EventKind::PlanCorrupted, err.to_string())
                        .with_flow(self.flow.slug.clone()),
                );
                self.delete_plan();
                Ok(None)
            }
        }
    }

    async fn build_plan(
        &self,
        user: &User,
        initial_context: BTreeMap<String, Value>,
    ) -> Result<FlowPlan, FlowError> {
        let planner = FlowPlanner::new(self.flow.clone(), self.services.clone());
        let request = PolicyRequest::new(user.clone()).with_context(initial_context);
        planner.plan(request).await
    }

    fn store_plan(&self, plan: &FlowPlan) -> Result<(), FlowError> {
        let bytes = plan.serialize()?;
        self.services
            .sessions
            .put(&self.session_id, bytes)
            .map_err(FlowError::Storage)
    }

    /// Best-effort deletion; a failure here must not mask the real outcome.
    fn delete_plan(&self) {
        if let Err(err) = self.services.sessions.delete(&self.session_id) {
            warn!(session = self.session_id, error = %err, "failed to delete session plan");
        }
    }
}
