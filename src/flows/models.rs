//! Flow and stage binding data model.
//!
//! A flow is an ordered template of stages a user is routed through for one
//! purpose (login, enrollment, recovery). Stage bindings attach stages to a
//! flow with an order and per-binding policy behaviour.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::policies::{PolicyEngineMode, PolicyTarget};

/// What a flow is used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowDesignation {
    Authentication,
    Authorization,
    Invalidation,
    Enrollment,
    Unenrollment,
    Recovery,
    StageConfiguration,
}

/// How the executor handles an invalid response to a challenge.
///
/// `Retry` returns the error and a similar challenge. `Restart` restarts the
/// flow from the beginning. `RestartWithContext` restarts the flow while
/// keeping the current context.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidResponseAction {
    #[default]
    Retry,
    Restart,
    RestartWithContext,
}

/// One unit of work in a flow. `component` is the stable discriminator
/// resolved through the stage registry; the engine never hard-codes stage
/// kinds, it only dispatches through that registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// `None` marks an in-memory stage that exists only for the lifetime of
    /// a plan and was never persisted.
    pub stage_uuid: Option<Uuid>,
    pub name: String,
    pub component: String,
}

impl Stage {
    #[must_use]
    pub fn new(name: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            stage_uuid: Some(Uuid::new_v4()),
            name: name.into(),
            component: component.into(),
        }
    }

    /// Stage constructed without a persistence key.
    #[must_use]
    pub fn in_memory(component: impl Into<String>) -> Self {
        let component = component.into();
        Self {
            stage_uuid: None,
            name: component.clone(),
            component,
        }
    }

    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.stage_uuid.is_none()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_in_memory() {
            write!(f, "In-memory stage {}", self.component)
        } else {
            write!(f, "Stage {}", self.name)
        }
    }
}

/// Relationship between a flow and a stage. Order is the primary sort key and
/// unique within a flow; policies attached to the binding decide whether it
/// applies to the current user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlowStageBinding {
    pub fsb_uuid: Uuid,
    pub stage: Stage,
    pub order: i32,
    /// Evaluate policies during planning. Disable for input-based policies.
    pub evaluate_on_plan: bool,
    /// Re-check policies when the stage is about to be presented.
    pub re_evaluate_policies: bool,
    pub invalid_response_action: InvalidResponseAction,
    pub policy_engine_mode: PolicyEngineMode,
}

impl FlowStageBinding {
    #[must_use]
    pub fn new(stage: Stage, order: i32) -> Self {
        Self {
            fsb_uuid: Uuid::new_v4(),
            stage,
            order,
            evaluate_on_plan: true,
            re_evaluate_policies: false,
            invalid_response_action: InvalidResponseAction::default(),
            policy_engine_mode: PolicyEngineMode::default(),
        }
    }

    #[must_use]
    pub fn with_evaluate_on_plan(mut self, evaluate_on_plan: bool) -> Self {
        self.evaluate_on_plan = evaluate_on_plan;
        self
    }

    #[must_use]
    pub fn with_re_evaluate_policies(mut self, re_evaluate_policies: bool) -> Self {
        self.re_evaluate_policies = re_evaluate_policies;
        self
    }

    #[must_use]
    pub fn with_invalid_response_action(mut self, action: InvalidResponseAction) -> Self {
        self.invalid_response_action = action;
        self
    }

    #[must_use]
    pub fn with_policy_engine_mode(mut self, mode: PolicyEngineMode) -> Self {
        self.policy_engine_mode = mode;
        self
    }

    /// Key under which this binding's own policy bindings are stored.
    #[must_use]
    pub fn policy_target(&self) -> PolicyTarget {
        PolicyTarget::StageBinding(self.fsb_uuid)
    }
}

impl fmt::Display for FlowStageBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Flow-stage binding #{} ({})", self.order, self.stage)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub flow_uuid: Uuid,
    pub name: String,
    /// Visible in the URL.
    pub slug: String,
    /// Shown as the title on flow pages; `{app}` is replaced with the
    /// originating application from the plan context.
    pub title: String,
    pub designation: FlowDesignation,
    pub policy_engine_mode: PolicyEngineMode,
}

impl Flow {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        slug: impl Into<String>,
        title: impl Into<String>,
        designation: FlowDesignation,
    ) -> Self {
        Self {
            flow_uuid: Uuid::new_v4(),
            name: name.into(),
            slug: slug.into(),
            title: title.into(),
            designation,
            policy_engine_mode: PolicyEngineMode::default(),
        }
    }

    #[must_use]
    pub fn with_policy_engine_mode(mut self, mode: PolicyEngineMode) -> Self {
        self.policy_engine_mode = mode;
        self
    }

    #[must_use]
    pub fn policy_target(&self) -> PolicyTarget {
        PolicyTarget::Flow(self.flow_uuid)
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Flow {} ({})", self.name, self.slug)
    }
}
