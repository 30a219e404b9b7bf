//! Flow definition snapshot loading from PostgreSQL.
//!
//! Flow definitions change at administration time, not per request, so the
//! server loads them once at startup into the immutable in-memory snapshot
//! and serves every request from that. Restart (or a future reload signal)
//! picks up definition changes.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, Instrument};
use uuid::Uuid;

use crate::flows::models::{Flow, FlowDesignation, FlowStageBinding, InvalidResponseAction, Stage};
use crate::policies::{
    PolicyBinding, PolicyBindingKind, PolicyEngineMode, PolicyTarget, User,
    DEFAULT_BINDING_TIMEOUT,
};
use crate::storage::memory::{
    FlowStoreBuilder, InMemoryFlowStore, InMemoryUserDirectory,
};

/// Load all flows, stage bindings, and policy bindings into one snapshot.
pub async fn load_flow_store(pool: &PgPool) -> Result<InMemoryFlowStore> {
    let mut builder = FlowStoreBuilder::new();
    let mut flow_count = 0usize;

    let query = "SELECT id, name, slug, title, designation, policy_engine_mode FROM flows";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to load flows")?;

    for row in rows {
        let flow = Flow {
            flow_uuid: row.get("id"),
            name: row.get("name"),
            slug: row.get("slug"),
            title: row.get("title"),
            designation: parse_designation(&row.get::<String, _>("designation"))?,
            policy_engine_mode: parse_engine_mode(&row.get::<String, _>("policy_engine_mode"))?,
        };
        builder = builder.with_flow(flow);
        flow_count += 1;
    }

    let stage_bindings = load_stage_bindings(pool).await?;
    let mut binding_count = 0usize;
    for (flow_uuid, bindings) in stage_bindings {
        for binding in bindings {
            builder = builder.with_stage_binding(flow_uuid, binding);
            binding_count += 1;
        }
    }

    let mut policy_count = 0usize;
    for (target, binding) in load_policy_bindings(pool).await? {
        builder = builder.with_policy_binding(target, binding);
        policy_count += 1;
    }

    info!(
        flows = flow_count,
        stage_bindings = binding_count,
        policy_bindings = policy_count,
        "loaded flow definition snapshot"
    );

    Ok(builder.build())
}

// Evaluation order is sort_order ascending with creation order breaking
// ties; an unordered scan would break ties arbitrarily across restarts, so
// both binding queries must order by (sort_order, created_at, id).
const STAGE_BINDINGS_QUERY: &str = r"
        SELECT b.id, b.flow_id, b.sort_order,
               b.evaluate_on_plan, b.re_evaluate_policies,
               b.invalid_response_action, b.policy_engine_mode,
               s.id AS stage_id, s.name AS stage_name, s.component
        FROM flow_stage_bindings b
        JOIN stages s ON s.id = b.stage_id
        ORDER BY b.sort_order, b.created_at, b.id
    ";

const POLICY_BINDINGS_QUERY: &str = r"
        SELECT id, target_type, target_id, policy_name, fixed_result,
               sort_order, negate, enabled, timeout_seconds
        FROM policy_bindings
        ORDER BY sort_order, created_at, id
    ";

async fn load_stage_bindings(pool: &PgPool) -> Result<HashMap<Uuid, Vec<FlowStageBinding>>> {
    let query = STAGE_BINDINGS_QUERY;
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to load stage bindings")?;

    let mut bindings: HashMap<Uuid, Vec<FlowStageBinding>> = HashMap::new();
    for row in rows {
        let flow_id: Uuid = row.get("flow_id");
        let binding = FlowStageBinding {
            fsb_uuid: row.get("id"),
            stage: Stage {
                stage_uuid: Some(row.get("stage_id")),
                name: row.get("stage_name"),
                component: row.get("component"),
            },
            order: row.get("sort_order"),
            evaluate_on_plan: row.get("evaluate_on_plan"),
            re_evaluate_policies: row.get("re_evaluate_policies"),
            invalid_response_action: parse_invalid_response_action(
                &row.get::<String, _>("invalid_response_action"),
            )?,
            policy_engine_mode: parse_engine_mode(&row.get::<String, _>("policy_engine_mode"))?,
        };
        bindings.entry(flow_id).or_default().push(binding);
    }
    Ok(bindings)
}

async fn load_policy_bindings(pool: &PgPool) -> Result<Vec<(PolicyTarget, PolicyBinding)>> {
    let query = POLICY_BINDINGS_QUERY;
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to load policy bindings")?;

    let mut bindings = Vec::with_capacity(rows.len());
    for row in rows {
        let target_id: Uuid = row.get("target_id");
        let target = match row.get::<String, _>("target_type").as_str() {
            "flow" => PolicyTarget::Flow(target_id),
            "stage_binding" => PolicyTarget::StageBinding(target_id),
            other => anyhow::bail!("unknown policy binding target type {other:?}"),
        };
        let kind = match (
            row.get::<Option<String>, _>("policy_name"),
            row.get::<Option<bool>, _>("fixed_result"),
        ) {
            (Some(name), None) => PolicyBindingKind::Policy(name),
            (None, Some(result)) => PolicyBindingKind::FixedResult(result),
            _ => anyhow::bail!(
                "policy binding {} must set exactly one of policy_name and fixed_result",
                row.get::<Uuid, _>("id")
            ),
        };
        let timeout = row
            .get::<Option<i64>, _>("timeout_seconds")
            .and_then(|seconds| u64::try_from(seconds).ok())
            .map_or(DEFAULT_BINDING_TIMEOUT, Duration::from_secs);
        bindings.push((
            target,
            PolicyBinding {
                binding_uuid: row.get("id"),
                kind,
                order: row.get("sort_order"),
                negate: row.get("negate"),
                enabled: row.get("enabled"),
                timeout,
            },
        ));
    }
    Ok(bindings)
}

/// Load the user directory used by the identification stage.
pub async fn load_users(pool: &PgPool) -> Result<InMemoryUserDirectory> {
    let query = "SELECT id, username, email, is_active FROM users";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to load users")?;

    let mut directory = InMemoryUserDirectory::new();
    let count = rows.len();
    for row in rows {
        directory = directory.with_user(User {
            uuid: row.get("id"),
            username: row.get("username"),
            email: row.get("email"),
            is_active: row.get("is_active"),
        });
    }
    info!(users = count, "loaded user directory snapshot");
    Ok(directory)
}

fn parse_designation(value: &str) -> Result<FlowDesignation> {
    match value {
        "authentication" => Ok(FlowDesignation::Authentication),
        "authorization" => Ok(FlowDesignation::Authorization),
        "invalidation" => Ok(FlowDesignation::Invalidation),
        "enrollment" => Ok(FlowDesignation::Enrollment),
        "unenrollment" => Ok(FlowDesignation::Unenrollment),
        "recovery" => Ok(FlowDesignation::Recovery),
        "stage_configuration" => Ok(FlowDesignation::StageConfiguration),
        other => anyhow::bail!("unknown flow designation {other:?}"),
    }
}

fn parse_engine_mode(value: &str) -> Result<PolicyEngineMode> {
    match value {
        "all" => Ok(PolicyEngineMode::All),
        "any" => Ok(PolicyEngineMode::Any),
        other => anyhow::bail!("unknown policy engine mode {other:?}"),
    }
}

fn parse_invalid_response_action(value: &str) -> Result<InvalidResponseAction> {
    match value {
        "retry" => Ok(InvalidResponseAction::Retry),
        "restart" => Ok(InvalidResponseAction::Restart),
        "restart_with_context" => Ok(InvalidResponseAction::RestartWithContext),
        other => anyhow::bail!("unknown invalid response action {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_queries_arrive_in_creation_stable_order() {
        // PostgreSQL leaves unordered scan order unspecified, so ties on
        // sort_order must be broken in SQL, not by row-return order.
        for query in [STAGE_BINDINGS_QUERY, POLICY_BINDINGS_QUERY] {
            let order_by = query
                .split("ORDER BY")
                .nth(1)
                .unwrap_or_else(|| panic!("no ORDER BY in {query}"));
            assert!(order_by.contains("sort_order"), "missing primary key: {query}");
            assert!(
                order_by.contains("created_at"),
                "ties must fall back to creation order: {query}"
            );
        }
    }

    #[test]
    fn designation_parsing_covers_all_variants() {
        assert_eq!(
            parse_designation("authentication").unwrap(),
            FlowDesignation::Authentication
        );
        assert_eq!(
            parse_designation("stage_configuration").unwrap(),
            FlowDesignation::StageConfiguration
        );
        assert!(parse_designation("login").is_err());
    }

    #[test]
    fn engine_mode_parsing_rejects_unknown() {
        assert_eq!(parse_engine_mode("all").unwrap(), PolicyEngineMode::All);
        assert_eq!(parse_engine_mode("any").unwrap(), PolicyEngineMode::Any);
        assert!(parse_engine_mode("most").is_err());
    }

    #[test]
    fn invalid_response_action_parsing() {
        assert_eq!(
            parse_invalid_response_action("retry").unwrap(),
            InvalidResponseAction::Retry
        );
        assert_eq!(
            parse_invalid_response_action("restart_with_context").unwrap(),
            InvalidResponseAction::RestartWithContext
        );
        assert!(parse_invalid_response_action("ignore").is_err());
    }
}
