//! End-to-end flow execution through the public engine API: plan, challenge,
//! respond, and finish an authentication flow against in-memory collaborators.

use serde_json::json;
use std::sync::Arc;

use passgate::events::{CollectingEventSink, EventKind};
use passgate::flows::challenge::COMPONENT_ACCESS_DENIED;
use passgate::flows::plan::{FlowPlan, PLAN_CONTEXT_AUTHENTICATED_USER};
use passgate::flows::{
    ExecutorOutcome, Flow, FlowDesignation, FlowExecutor, FlowServices, FlowStageBinding,
    InvalidResponseAction, Stage,
};
use passgate::policies::{PolicyBinding, PolicyRegistry, PolicyTarget, User};
use passgate::stages::{components, StageRegistry};
use passgate::storage::{
    FlowStoreBuilder, InMemoryCredentialVerifier, InMemoryFlowStore, InMemorySessionStore,
    InMemoryUserDirectory, SessionStore,
};

const SESSION: &str = "it-session";

struct Harness {
    services: FlowServices,
    events: Arc<CollectingEventSink>,
    sessions: Arc<InMemorySessionStore>,
}

impl Harness {
    fn new(store: InMemoryFlowStore) -> Self {
        let alice = User::new("alice", "alice@example.com");
        let users = InMemoryUserDirectory::new().with_user(alice.clone());
        let verifier = InMemoryCredentialVerifier::new().with_secret(alice.uuid, "hunter2");
        let events = Arc::new(CollectingEventSink::new());
        let sessions = Arc::new(InMemorySessionStore::new());
        let services = FlowServices {
            flows: Arc::new(store),
            sessions: sessions.clone(),
            stages: Arc::new(StageRegistry::with_defaults(
                Arc::new(users),
                Arc::new(verifier),
            )),
            policies: Arc::new(PolicyRegistry::new()),
            events: events.clone(),
        };
        Self {
            services,
            events,
            sessions,
        }
    }

    fn executor(&self, flow: Flow) -> FlowExecutor {
        FlowExecutor::new(flow, SESSION, self.services.clone())
    }

    fn stored_plan(&self) -> Option<FlowPlan> {
        let bytes = self.sessions.get(SESSION).unwrap()?;
        Some(FlowPlan::deserialize(&bytes).unwrap())
    }
}

fn login_flow() -> Flow {
    Flow::new(
        "Login",
        "login",
        "Welcome",
        FlowDesignation::Authentication,
    )
}

fn full_login_store(flow: &Flow) -> FlowStoreBuilder {
    FlowStoreBuilder::new()
        .with_flow(flow.clone())
        .with_stage_binding(
            flow.flow_uuid,
            FlowStageBinding::new(Stage::in_memory(components::IDENTIFICATION), 0),
        )
        .with_stage_binding(
            flow.flow_uuid,
            FlowStageBinding::new(Stage::in_memory(components::PASSWORD), 10),
        )
        .with_stage_binding(
            flow.flow_uuid,
            FlowStageBinding::new(Stage::in_memory(components::USER_LOGIN), 20),
        )
}

fn expect_challenge(outcome: ExecutorOutcome) -> passgate::flows::Challenge {
    match outcome {
        ExecutorOutcome::Challenge(challenge) => challenge,
        other => panic!("expected a challenge, got {other:?}"),
    }
}

#[tokio::test]
async fn full_login_flow_reaches_redirect() {
    let flow = login_flow();
    let harness = Harness::new(full_login_store(&flow).build());
    let executor = harness.executor(flow);
    let user = User::anonymous();

    let challenge = expect_challenge(executor.get(&user).await.unwrap());
    assert_eq!(challenge.component, components::IDENTIFICATION);
    assert_eq!(challenge.title.as_deref(), Some("Welcome"));

    let challenge = expect_challenge(
        executor
            .post(&user, &json!({ "uid_field": "alice" }))
            .await
            .unwrap(),
    );
    assert_eq!(challenge.component, components::PASSWORD);

    let challenge = expect_challenge(
        executor
            .post(&user, &json!({ "password": "hunter2" }))
            .await
            .unwrap(),
    );
    assert_eq!(challenge.component, components::USER_LOGIN);

    // Login context must land before the plan finishes.
    let plan = harness.stored_plan().unwrap();
    assert!(plan.pending_user().is_some());

    let outcome = executor.post(&user, &json!({})).await.unwrap();
    assert_eq!(outcome, ExecutorOutcome::Redirect("/".to_string()));
    // The finished plan is gone; a new GET starts over.
    assert!(harness.stored_plan().is_none());
}

#[tokio::test]
async fn non_applicable_flow_is_denied_without_challenges() {
    let flow = login_flow();
    let store = full_login_store(&flow)
        .with_policy_binding(
            PolicyTarget::Flow(flow.flow_uuid),
            PolicyBinding::fixed(false, 0),
        )
        .build();
    let harness = Harness::new(store);
    let executor = harness.executor(flow);

    let outcome = executor.get(&User::anonymous()).await.unwrap();
    let ExecutorOutcome::Denied(challenge) = outcome else {
        panic!("expected denial");
    };
    assert_eq!(challenge.component, COMPONENT_ACCESS_DENIED);
    assert!(harness.events.kinds().contains(&EventKind::FlowDenied));
    assert!(harness.stored_plan().is_none());
}

#[tokio::test]
async fn failing_binding_policy_omits_the_stage_from_the_plan() {
    let flow = login_flow();
    let password_binding = FlowStageBinding::new(Stage::in_memory(components::PASSWORD), 10);
    let store = FlowStoreBuilder::new()
        .with_flow(flow.clone())
        .with_stage_binding(
            flow.flow_uuid,
            FlowStageBinding::new(Stage::in_memory(components::IDENTIFICATION), 0),
        )
        .with_policy_binding(
            password_binding.policy_target(),
            PolicyBinding::fixed(false, 0),
        )
        .with_stage_binding(flow.flow_uuid, password_binding)
        .with_stage_binding(
            flow.flow_uuid,
            FlowStageBinding::new(Stage::in_memory(components::USER_LOGIN), 20),
        )
        .build();
    let harness = Harness::new(store);
    let executor = harness.executor(flow);
    let user = User::anonymous();

    expect_challenge(executor.get(&user).await.unwrap());
    // The password stage was filtered at planning time, so identification
    // jumps straight to user-login.
    let challenge = expect_challenge(
        executor
            .post(&user, &json!({ "uid_field": "alice" }))
            .await
            .unwrap(),
    );
    assert_eq!(challenge.component, components::USER_LOGIN);
}

#[tokio::test]
async fn negated_passing_policy_omits_the_stage() {
    let flow = login_flow();
    let password_binding = FlowStageBinding::new(Stage::in_memory(components::PASSWORD), 10);
    let store = FlowStoreBuilder::new()
        .with_flow(flow.clone())
        .with_stage_binding(
            flow.flow_uuid,
            FlowStageBinding::new(Stage::in_memory(components::IDENTIFICATION), 0),
        )
        .with_policy_binding(
            password_binding.policy_target(),
            PolicyBinding::fixed(true, 0).with_negate(true),
        )
        .with_stage_binding(flow.flow_uuid, password_binding)
        .with_stage_binding(
            flow.flow_uuid,
            FlowStageBinding::new(Stage::in_memory(components::USER_LOGIN), 20),
        )
        .build();
    let harness = Harness::new(store);
    let executor = harness.executor(flow);
    let user = User::anonymous();

    expect_challenge(executor.get(&user).await.unwrap());
    let plan = harness.stored_plan().unwrap();
    assert!(plan
        .bindings
        .iter()
        .all(|binding| binding.stage.component != components::PASSWORD));
}

#[tokio::test]
async fn invalid_password_retries_with_field_errors() {
    let flow = login_flow();
    let harness = Harness::new(full_login_store(&flow).build());
    let executor = harness.executor(flow);
    let user = User::anonymous();

    expect_challenge(executor.get(&user).await.unwrap());
    expect_challenge(
        executor
            .post(&user, &json!({ "uid_field": "alice" }))
            .await
            .unwrap(),
    );

    let challenge = expect_challenge(
        executor
            .post(&user, &json!({ "password": "wrong" }))
            .await
            .unwrap(),
    );
    assert_eq!(challenge.component, components::PASSWORD);
    assert_eq!(challenge.response_errors["password"][0].code, "invalid");

    // The plan did not advance; the right password still works.
    let challenge = expect_challenge(
        executor
            .post(&user, &json!({ "password": "hunter2" }))
            .await
            .unwrap(),
    );
    assert_eq!(challenge.component, components::USER_LOGIN);
}

#[tokio::test]
async fn restart_action_replans_from_the_beginning() {
    let flow = login_flow();
    let store = FlowStoreBuilder::new()
        .with_flow(flow.clone())
        .with_stage_binding(
            flow.flow_uuid,
            FlowStageBinding::new(Stage::in_memory(components::IDENTIFICATION), 0),
        )
        .with_stage_binding(
            flow.flow_uuid,
            FlowStageBinding::new(Stage::in_memory(components::PASSWORD), 10)
                .with_invalid_response_action(InvalidResponseAction::Restart),
        )
        .build();
    let harness = Harness::new(store);
    let executor = harness.executor(flow);
    let user = User::anonymous();

    expect_challenge(executor.get(&user).await.unwrap());
    expect_challenge(
        executor
            .post(&user, &json!({ "uid_field": "alice" }))
            .await
            .unwrap(),
    );

    let challenge = expect_challenge(
        executor
            .post(&user, &json!({ "password": "wrong" }))
            .await
            .unwrap(),
    );
    assert_eq!(challenge.component, components::IDENTIFICATION);
    // Plain restart drops the accumulated context.
    let plan = harness.stored_plan().unwrap();
    assert!(plan.pending_user().is_none());
}

#[tokio::test]
async fn restart_with_context_keeps_the_pending_user() {
    let flow = login_flow();
    let store = FlowStoreBuilder::new()
        .with_flow(flow.clone())
        .with_stage_binding(
            flow.flow_uuid,
            FlowStageBinding::new(Stage::in_memory(components::IDENTIFICATION), 0),
        )
        .with_stage_binding(
            flow.flow_uuid,
            FlowStageBinding::new(Stage::in_memory(components::PASSWORD), 10)
                .with_invalid_response_action(InvalidResponseAction::RestartWithContext),
        )
        .build();
    let harness = Harness::new(store);
    let executor = harness.executor(flow);
    let user = User::anonymous();

    expect_challenge(executor.get(&user).await.unwrap());
    expect_challenge(
        executor
            .post(&user, &json!({ "uid_field": "alice" }))
            .await
            .unwrap(),
    );

    let challenge = expect_challenge(
        executor
            .post(&user, &json!({ "password": "wrong" }))
            .await
            .unwrap(),
    );
    assert_eq!(challenge.component, components::IDENTIFICATION);
    let plan = harness.stored_plan().unwrap();
    assert_eq!(plan.pending_user().unwrap().username, "alice");
}

#[tokio::test]
async fn presentation_time_re_evaluation_skips_the_stage() {
    let flow = login_flow();
    let password_binding = FlowStageBinding::new(Stage::in_memory(components::PASSWORD), 10)
        .with_evaluate_on_plan(false)
        .with_re_evaluate_policies(true);
    let store = FlowStoreBuilder::new()
        .with_flow(flow.clone())
        .with_stage_binding(
            flow.flow_uuid,
            FlowStageBinding::new(Stage::in_memory(components::IDENTIFICATION), 0),
        )
        .with_policy_binding(
            password_binding.policy_target(),
            PolicyBinding::fixed(false, 0),
        )
        .with_stage_binding(flow.flow_uuid, password_binding)
        .with_stage_binding(
            flow.flow_uuid,
            FlowStageBinding::new(Stage::in_memory(components::USER_LOGIN), 20),
        )
        .build();
    let harness = Harness::new(store);
    let executor = harness.executor(flow);
    let user = User::anonymous();

    // The password stage survives planning (evaluate_on_plan is off) but is
    // skipped when it reaches the front of the plan.
    expect_challenge(executor.get(&user).await.unwrap());
    let plan = harness.stored_plan().unwrap();
    assert_eq!(plan.len(), 3);

    let challenge = expect_challenge(
        executor
            .post(&user, &json!({ "uid_field": "alice" }))
            .await
            .unwrap(),
    );
    assert_eq!(challenge.component, components::USER_LOGIN);
    assert!(harness.events.kinds().contains(&EventKind::StageSkipped));
}

#[tokio::test]
async fn corrupt_session_plan_is_discarded_and_replanned() {
    let flow = login_flow();
    let harness = Harness::new(full_login_store(&flow).build());
    harness
        .sessions
        .put(SESSION, b"not a plan".to_vec())
        .unwrap();
    let executor = harness.executor(flow);

    let challenge = expect_challenge(executor.get(&User::anonymous()).await.unwrap());
    assert_eq!(challenge.component, components::IDENTIFICATION);
    assert!(harness.events.kinds().contains(&EventKind::PlanCorrupted));
}

#[tokio::test]
async fn completed_login_records_the_authenticated_user() {
    let flow = login_flow();
    let harness = Harness::new(full_login_store(&flow).build());
    let executor = harness.executor(flow);
    let user = User::anonymous();

    expect_challenge(executor.get(&user).await.unwrap());
    expect_challenge(
        executor
            .post(&user, &json!({ "uid_field": "alice" }))
            .await
            .unwrap(),
    );
    expect_challenge(
        executor
            .post(&user, &json!({ "password": "hunter2" }))
            .await
            .unwrap(),
    );

    // Before the final auto-submit the stored plan still holds the context;
    // the user-login stage writes the authenticated user on acceptance.
    let plan = harness.stored_plan().unwrap();
    assert!(!plan.context.contains_key(PLAN_CONTEXT_AUTHENTICATED_USER));
    let outcome = executor.post(&user, &json!({})).await.unwrap();
    assert!(matches!(outcome, ExecutorOutcome::Redirect(_)));
}
