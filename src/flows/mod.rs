//! Flow planning and execution.

use std::sync::Arc;

pub mod challenge;
pub mod error;
pub mod executor;
pub mod models;
pub mod plan;
pub mod planner;

pub use challenge::{Challenge, ChallengeField, ErrorDetail, ValidationOutcome};
pub use error::FlowError;
pub use executor::{ExecutorOutcome, FlowExecutor};
pub use models::{Flow, FlowDesignation, FlowStageBinding, InvalidResponseAction, Stage};
pub use plan::FlowPlan;
pub use planner::FlowPlanner;

use crate::events::EventSink;
use crate::policies::PolicyRegistry;
use crate::stages::StageRegistry;
use crate::storage::{FlowStore, SessionStore};

/// Shared handles the planner and executor operate against. Definitions and
/// registries are read-only during evaluation; the session store is the only
/// mutable collaborator.
#[derive(Clone)]
pub struct FlowServices {
    pub flows: Arc<dyn FlowStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub stages: Arc<StageRegistry>,
    pub policies: Arc<PolicyRegistry>,
    pub events: Arc<dyn EventSink>,
}
