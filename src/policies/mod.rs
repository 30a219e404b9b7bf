//! Policy evaluation: opaque pass/fail checks, bindings, and the engine that
//! aggregates them per target.

use std::collections::HashMap;
use std::sync::Arc;

pub mod engine;
pub mod models;
pub(crate) mod process;
pub mod types;

pub use engine::PolicyEngine;
pub use models::{
    PolicyBinding, PolicyBindingKind, PolicyEngineMode, PolicyTarget, DEFAULT_BINDING_TIMEOUT,
};
pub use types::{PolicyRequest, PolicyResult, User};

/// Opaque pass/fail check evaluated against a request context.
///
/// Implementations must treat their own definition as immutable; the request
/// context is the only writable surface, and writes are visible to policies
/// evaluated later in the same run.
pub trait Policy: Send + Sync {
    fn check(&self, request: &mut PolicyRequest) -> PolicyResult;
}

/// Policy with a constant outcome, optionally carrying a message.
#[derive(Clone, Debug)]
pub struct StaticPolicy {
    passing: bool,
    message: Option<String>,
}

impl StaticPolicy {
    #[must_use]
    pub fn passing() -> Self {
        Self {
            passing: true,
            message: None,
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            passing: false,
            message: Some(message.into()),
        }
    }
}

impl Policy for StaticPolicy {
    fn check(&self, _request: &mut PolicyRequest) -> PolicyResult {
        let mut result = PolicyResult::new(self.passing);
        if let Some(message) = &self.message {
            result.messages.push(message.clone());
        }
        result
    }
}

/// Policy that delegates to a set of member policies and combines their
/// results with the same ALL/ANY algebra the engine uses. Member results are
/// kept as `source_results` for provenance.
pub struct PolicyGroup {
    mode: PolicyEngineMode,
    members: Vec<Arc<dyn Policy>>,
}

impl PolicyGroup {
    #[must_use]
    pub fn new(mode: PolicyEngineMode, members: Vec<Arc<dyn Policy>>) -> Self {
        Self { mode, members }
    }
}

impl Policy for PolicyGroup {
    fn check(&self, request: &mut PolicyRequest) -> PolicyResult {
        // An empty group passes, same as an empty binding set on a target.
        let results: Vec<PolicyResult> = self
            .members
            .iter()
            .map(|member| member.check(request))
            .collect();
        let passing = match self.mode {
            PolicyEngineMode::All => results.iter().all(|result| result.passing),
            PolicyEngineMode::Any => results.is_empty() || results.iter().any(|r| r.passing),
        };
        let mut aggregate = PolicyResult::new(passing);
        for result in &results {
            aggregate.messages.extend(result.messages.iter().cloned());
        }
        aggregate.source_results = results;
        aggregate
    }
}

/// Name to evaluator map, populated at process start.
///
/// Concrete policy kinds (expression, reputation, password strength, ...)
/// plug in here without the engine knowing their internals.
#[derive(Clone, Default)]
pub struct PolicyRegistry {
    policies: HashMap<String, Arc<dyn Policy>>,
}

impl PolicyRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, policy: Arc<dyn Policy>) {
        self.policies.insert(name.into(), policy);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Policy>> {
        self.policies.get(name).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
