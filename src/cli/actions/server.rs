use crate::api;
use crate::cli::actions::Action;
use crate::events::TracingEventSink;
use crate::flows::models::{Flow, FlowDesignation, FlowStageBinding, Stage};
use crate::flows::FlowServices;
use crate::policies::PolicyRegistry;
use crate::stages::{components, StageRegistry};
use crate::storage::{
    postgres, FlowStoreBuilder, InMemoryCredentialVerifier, InMemoryFlowStore,
    InMemorySessionStore, InMemoryUserDirectory,
};
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    let Action::Server {
        port,
        dsn,
        frontend_url,
    } = action;

    let (services, pool) = match dsn {
        Some(dsn) => from_database(&dsn).await?,
        None => {
            info!("no DSN configured, serving built-in demo fixtures");
            (demo_services(), None)
        }
    };

    api::new(port, &frontend_url, services, pool).await
}

async fn from_database(dsn: &str) -> Result<(FlowServices, Option<PgPool>)> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")?;

    let flows = postgres::load_flow_store(&pool).await?;
    let users = postgres::load_users(&pool).await?;

    // Password verification needs an external credential backend; without one
    // the password stage rejects every response.
    warn!("no credential backend configured, password stages will reject all responses");
    let verifier = InMemoryCredentialVerifier::new();

    Ok((
        services_from(flows, users, verifier),
        Some(pool),
    ))
}

/// Self-contained login flow for trying the engine without a database.
fn demo_services() -> FlowServices {
    let flow = Flow::new(
        "Demo authentication",
        "login",
        "Sign in to {app}",
        FlowDesignation::Authentication,
    );
    let flow_uuid = flow.flow_uuid;
    let flows = FlowStoreBuilder::new()
        .with_flow(flow)
        .with_stage_binding(
            flow_uuid,
            FlowStageBinding::new(Stage::in_memory(components::IDENTIFICATION), 0),
        )
        .with_stage_binding(
            flow_uuid,
            FlowStageBinding::new(Stage::in_memory(components::PASSWORD), 10),
        )
        .with_stage_binding(
            flow_uuid,
            FlowStageBinding::new(Stage::in_memory(components::USER_LOGIN), 20),
        )
        .build();

    let demo_user = crate::policies::User::new("demo", "demo@example.com");
    let verifier = InMemoryCredentialVerifier::new().with_secret(demo_user.uuid, "demo");
    let users = InMemoryUserDirectory::new().with_user(demo_user);

    services_from(flows, users, verifier)
}

fn services_from(
    flows: InMemoryFlowStore,
    users: InMemoryUserDirectory,
    verifier: InMemoryCredentialVerifier,
) -> FlowServices {
    let users: Arc<dyn crate::storage::UserDirectory> = Arc::new(users);
    let verifier: Arc<dyn crate::storage::CredentialVerifier> = Arc::new(verifier);
    FlowServices {
        flows: Arc::new(flows),
        sessions: Arc::new(InMemorySessionStore::new()),
        stages: Arc::new(StageRegistry::with_defaults(users, verifier)),
        policies: Arc::new(PolicyRegistry::new()),
        events: Arc::new(TracingEventSink),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::PolicyTarget;

    #[test]
    fn demo_fixture_serves_a_login_flow() {
        let services = demo_services();
        let flow = services.flows.flow_by_slug("login").unwrap();
        let bindings = services.flows.stage_bindings(&flow.flow_uuid);
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings[0].stage.component, components::IDENTIFICATION);
        assert_eq!(bindings[2].stage.component, components::USER_LOGIN);
        assert!(services
            .flows
            .policy_bindings(&PolicyTarget::Flow(flow.flow_uuid))
            .is_empty());
        for binding in &bindings {
            assert!(services.stages.get(&binding.stage.component).is_some());
        }
    }
}
