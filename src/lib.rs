//! # Passgate (Flow Execution Engine)
//!
//! `passgate` routes users through configurable authentication flows. A flow
//! is an ordered template of stages (identify, prove a password, log in);
//! policies attached to the flow and its stage bindings decide which stages
//! apply to the current user.
//!
//! ## Plan / Execute Split
//!
//! - **Planning:** the planner evaluates flow-level and binding-level policies
//!   once and materializes a [`flows::FlowPlan`], the ordered list of stages
//!   this user will actually traverse plus a shared context map.
//! - **Execution:** the executor walks the plan one challenge/response cycle
//!   at a time, persisting the plan in the session store between round trips.
//!
//! ## Policy Evaluation
//!
//! Policies are opaque pass/fail checks combined per target with ALL or ANY
//! semantics. Misbehaving policies (timeouts, panics) degrade to failing
//! results instead of taking the engine down.
//!
//! Challenges are declarative: the server describes the input it needs and a
//! frontend renders it, so the engine stays transport-agnostic.

pub mod api;
pub mod cli;
pub mod events;
pub mod flows;
pub mod policies;
pub mod stages;
pub mod storage;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
