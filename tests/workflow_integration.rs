//! Integration tests for the HTTP client and orchestrator.
//!
//! Each test spins up a fake workflow server on a random port and drives it
//! through `HttpSessionClient`, checking what went over the wire.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::timeout;

use design_assist::adapter::{ErrorContext, EventHub, UiEvent};
use design_assist::client::{HttpSessionClient, SessionApi, SessionId};
use design_assist::config::{Backoff, ClientConfig, PollConfig, RetryPolicy};
use design_assist::error::ApiError;
use design_assist::session::Orchestrator;
use design_assist::workflow::Stage;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// In-memory workflow server.
struct FakeServer {
    stage: Mutex<String>,
    key_questions: Mutex<Value>,
    visualizations: Mutex<Vec<String>>,
    /// Typed manifests served in order, the last one repeating. `None`
    /// means the endpoint is not offered.
    typed_manifests: Mutex<Option<VecDeque<Value>>>,
    /// Stage label the next skip answers with, instead of advancing.
    skip_answer: Mutex<Option<String>>,
    hits: Mutex<HashMap<&'static str, usize>>,
    total: AtomicUsize,
}

impl FakeServer {
    fn new(stage: &str) -> Arc<Self> {
        Arc::new(Self {
            stage: Mutex::new(stage.to_string()),
            key_questions: Mutex::new(json!([])),
            visualizations: Mutex::new(Vec::new()),
            typed_manifests: Mutex::new(None),
            skip_answer: Mutex::new(None),
            hits: Mutex::new(HashMap::new()),
            total: AtomicUsize::new(0),
        })
    }

    fn hit(&self, endpoint: &'static str) {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self.hits.lock().unwrap().entry(endpoint).or_default() += 1;
    }

    fn hits(&self, endpoint: &str) -> usize {
        self.hits.lock().unwrap().get(endpoint).copied().unwrap_or(0)
    }

    fn set_stage(&self, stage: &str) {
        *self.stage.lock().unwrap() = stage.to_string();
    }
}

async fn start_handler(State(fake): State<Arc<FakeServer>>) -> impl IntoResponse {
    fake.hit("start");
    Json(json!({ "session_id": "s-1" }))
}

async fn resume_handler(State(fake): State<Arc<FakeServer>>, Json(body): Json<Value>) -> impl IntoResponse {
    fake.hit("resume");
    let path = body["session_path"].as_str().unwrap_or_default().to_string();
    Json(json!({ "session_id": format!("resumed:{path}") }))
}

async fn list_handler(State(fake): State<Arc<FakeServer>>) -> impl IntoResponse {
    fake.hit("list_sessions");
    Json(json!({ "sessions": ["sessions/2024_05_01", "sessions/2024_05_02"] }))
}

async fn chat_handler(State(fake): State<Arc<FakeServer>>, Json(body): Json<Value>) -> impl IntoResponse {
    fake.hit("chat");
    match body["message"].as_str() {
        Some("fail") => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Session not found" })),
        ),
        Some("skip") => {
            fake.set_stage("STAGE_SOLUTION_GENERATION");
            (
                StatusCode::OK,
                Json(json!({
                    "response": "Skipping constraint refinement stage.",
                    "stage_change": true,
                    "next_stage": "STAGE_SOLUTION_GENERATION",
                    "current_stage": "STAGE_SOLUTION_GENERATION",
                    "stage_description": "Generating layout solutions",
                })),
            )
        }
        _ => (
            StatusCode::OK,
            Json(json!({
                "response": "What is the site area?",
                "stage_change": false,
            })),
        ),
    }
}

async fn skip_handler(State(fake): State<Arc<FakeServer>>) -> impl IntoResponse {
    fake.hit("skip_stage");
    let previous = fake.stage.lock().unwrap().clone();
    if let Some(answer) = fake.skip_answer.lock().unwrap().take() {
        return Json(json!({
            "previous_stage": previous,
            "current_stage": answer,
        }));
    }
    // The server natively answers with its own stage labels
    let next = match previous.as_str() {
        "STAGE_REQUIREMENT_GATHERING" | "需求收集阶段" => "约束条件生成阶段",
        _ => "布局方案优化阶段",
    };
    fake.set_stage(next);
    Json(json!({
        "previous_stage": previous,
        "current_stage": next,
        "stage_description": "advanced",
    }))
}

async fn state_handler(
    State(fake): State<Arc<FakeServer>>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    fake.hit("state");
    if query.get("session_id").map(String::as_str) == Some("missing") {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "Session not found" })));
    }
    let stage = fake.stage.lock().unwrap().clone();
    let key_questions = fake.key_questions.lock().unwrap().clone();
    (
        StatusCode::OK,
        Json(json!({
            "current_stage": stage,
            "stage_description": "working",
            "key_questions": key_questions,
        })),
    )
}

async fn visualize_handler(State(fake): State<Arc<FakeServer>>) -> impl IntoResponse {
    fake.hit("visualize");
    let paths = fake.visualizations.lock().unwrap().clone();
    Json(json!({ "visualizations": paths }))
}

async fn typed_manifest_handler(State(fake): State<Arc<FakeServer>>) -> impl IntoResponse {
    fake.hit("check_visualization_files");
    let mut typed = fake.typed_manifests.lock().unwrap();
    let Some(queue) = typed.as_mut() else {
        return (StatusCode::NOT_FOUND, Json(json!({})));
    };
    let files = if queue.len() > 1 {
        queue.pop_front().unwrap_or_default()
    } else {
        queue.front().cloned().unwrap_or_default()
    };
    (StatusCode::OK, Json(json!({ "files": files })))
}

fn routes(fake: Arc<FakeServer>) -> Router {
    Router::new()
        .route("/api/start", post(start_handler))
        .route("/api/resume", post(resume_handler))
        .route("/api/list_sessions", get(list_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/skip_stage", post(skip_handler))
        .route("/api/state", get(state_handler))
        .route("/api/visualize", get(visualize_handler))
        .route("/api/check_visualization_files", get(typed_manifest_handler))
        .with_state(fake)
}

/// Start the fake server on a random port and return its base URL.
async fn start_server(fake: Arc<FakeServer>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let app = routes(fake);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://127.0.0.1:{port}")
}

fn config(base_url: String) -> ClientConfig {
    ClientConfig {
        base_url,
        request_timeout: Duration::from_secs(2),
        retry_delay: Duration::from_millis(10),
        poll: PollConfig {
            base_interval: Duration::from_secs(3600),
            fast_interval: Duration::from_secs(3600),
            fast_stages: vec![],
        },
        visualization_retry: RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(10),
            backoff: Backoff::Fixed,
            jitter: 0.0,
        },
        ..Default::default()
    }
}

async fn setup(
    fake: Arc<FakeServer>,
    tweak: impl FnOnce(&mut ClientConfig),
) -> (Arc<Orchestrator>, broadcast::Receiver<UiEvent>) {
    let mut config = config(start_server(fake).await);
    tweak(&mut config);
    let api: Arc<dyn SessionApi> = Arc::new(HttpSessionClient::new(&config).unwrap());
    let hub = EventHub::new();
    let rx = hub.subscribe();
    (Orchestrator::from_config(api, hub, &config), rx)
}

fn drain(rx: &mut broadcast::Receiver<UiEvent>) -> Vec<UiEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn transitions(events: &[UiEvent]) -> Vec<(Stage, Stage)> {
    events
        .iter()
        .filter_map(|e| match e {
            UiEvent::StageChanged { event } => Some((event.previous_stage, event.next_stage)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn start_then_chat_keeps_stage() {
    timeout(TEST_TIMEOUT, async {
        let fake = FakeServer::new("STAGE_REQUIREMENT_GATHERING");
        let (orch, mut rx) = setup(Arc::clone(&fake), |_| {}).await;

        let id = orch.start_session().await.unwrap();
        assert_eq!(id, SessionId::new("s-1"));
        assert_eq!(orch.current_stage(), Some(Stage::RequirementGathering));
        drain(&mut rx);

        let reply = orch.send_chat("We want a courtyard house").await.unwrap();
        assert!(!reply.stage_change);
        assert_eq!(orch.current_stage(), Some(Stage::RequirementGathering));

        let events = drain(&mut rx);
        assert!(transitions(&events).is_empty());
        assert!(events.iter().any(|e| matches!(
            e,
            UiEvent::ChatReply { text, .. } if text == "What is the site area?"
        )));
        assert_eq!(fake.hits("chat"), 1);
        orch.dispose();
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn chat_stage_change_is_applied() {
    timeout(TEST_TIMEOUT, async {
        let fake = FakeServer::new("STAGE_CONSTRAINT_REFINEMENT");
        let (orch, mut rx) = setup(Arc::clone(&fake), |_| {}).await;
        orch.start_session().await.unwrap();
        drain(&mut rx);

        let reply = orch.send_chat("skip").await.unwrap();
        assert!(reply.stage_change);
        assert_eq!(reply.next_stage, Some(Stage::SolutionGeneration));
        assert_eq!(orch.current_stage(), Some(Stage::SolutionGeneration));
        assert_eq!(
            transitions(&drain(&mut rx)),
            vec![(Stage::ConstraintRefinement, Stage::SolutionGeneration)]
        );
        orch.dispose();
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn known_questions_trigger_single_skip() {
    timeout(TEST_TIMEOUT, async {
        let fake = FakeServer::new("需求收集阶段");
        *fake.key_questions.lock().unwrap() = json!([
            { "category": "site", "status": "known", "details": "500 m2" },
            { "category": "budget", "status": "已知" },
        ]);
        let (orch, mut rx) = setup(Arc::clone(&fake), |_| {}).await;

        orch.start_session().await.unwrap();
        assert_eq!(fake.hits("skip_stage"), 1);
        assert_eq!(orch.current_stage(), Some(Stage::ConstraintGeneration));

        orch.refresh_state().await.unwrap();
        assert_eq!(fake.hits("skip_stage"), 1);

        let events = drain(&mut rx);
        assert_eq!(
            transitions(&events),
            vec![(Stage::RequirementGathering, Stage::ConstraintGeneration)]
        );
        orch.dispose();
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn server_error_field_becomes_remote_error() {
    timeout(TEST_TIMEOUT, async {
        let fake = FakeServer::new("STAGE_REQUIREMENT_GATHERING");
        let base_url = start_server(Arc::clone(&fake)).await;
        let client = HttpSessionClient::new(&config(base_url)).unwrap();

        let err = client.send_chat(&SessionId::new("s-1"), "fail").await.unwrap_err();
        assert_eq!(err, ApiError::Remote("Session not found".into()));
        assert!(!err.is_transient());

        let err = client.fetch_state(&SessionId::new("missing")).await.unwrap_err();
        assert_eq!(err, ApiError::Remote("Session not found".into()));
        // Remote errors are not retried
        assert_eq!(fake.hits("state"), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn blank_input_sends_nothing() {
    timeout(TEST_TIMEOUT, async {
        let fake = FakeServer::new("STAGE_REQUIREMENT_GATHERING");
        let (orch, mut rx) = setup(Arc::clone(&fake), |_| {}).await;

        let err = orch.resume_session("").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
        assert_eq!(fake.total.load(Ordering::SeqCst), 0);
        assert!(drain(&mut rx).iter().any(|e| matches!(e, UiEvent::Error { .. })));

        orch.start_session().await.unwrap();
        let before = fake.total.load(Ordering::SeqCst);
        let err = orch.send_chat("   ").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
        assert_eq!(fake.total.load(Ordering::SeqCst), before);
        orch.dispose();
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn resume_and_list_sessions() {
    timeout(TEST_TIMEOUT, async {
        let fake = FakeServer::new("STAGE_SOLUTION_REFINEMENT");
        let (orch, _rx) = setup(Arc::clone(&fake), |_| {}).await;

        let sessions = orch.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 2);

        let id = orch.resume_session("  sessions/2024_05_01 ").await.unwrap();
        assert_eq!(id.as_str(), "resumed:sessions/2024_05_01");
        assert_eq!(orch.current_stage(), Some(Stage::SolutionRefinement));
        orch.dispose();
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn visualizations_fall_back_to_flat_listing() {
    timeout(TEST_TIMEOUT, async {
        let fake = FakeServer::new("STAGE_CONSTRAINT_GENERATION");
        *fake.visualizations.lock().unwrap() = vec![
            "sessions/s-1/constraints_visualization.png".into(),
            "sessions/s-1/constraints_visualization_table.png".into(),
        ];
        let (orch, _rx) = setup(Arc::clone(&fake), |_| {}).await;
        orch.start_session().await.unwrap();

        let manifest = orch.refresh_visualizations().await.unwrap().unwrap();
        let room_graph = manifest.room_graph.unwrap();
        assert!(room_graph.starts_with("http://127.0.0.1:"));
        assert!(room_graph.ends_with("/sessions/s-1/constraints_visualization.png"));
        assert!(manifest.constraints_table.unwrap().ends_with("_table.png"));
        assert!(manifest.layout.is_none());
        orch.dispose();
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn missing_visualizations_give_up_after_bounded_attempts() {
    timeout(TEST_TIMEOUT, async {
        let fake = FakeServer::new("STAGE_CONSTRAINT_GENERATION");
        let (orch, mut rx) = setup(Arc::clone(&fake), |_| {}).await;
        orch.start_session().await.unwrap();
        drain(&mut rx);

        assert!(orch.refresh_visualizations().await.unwrap().is_none());
        assert_eq!(fake.hits("visualize"), 3);
        assert!(drain(&mut rx).iter().any(|e| matches!(
            e,
            UiEvent::VisualizationsGaveUp { attempts: 3 }
        )));
        orch.dispose();
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn poller_picks_up_server_side_transition() {
    timeout(TEST_TIMEOUT, async {
        let fake = FakeServer::new("STAGE_SOLUTION_GENERATION");
        let (orch, mut rx) = setup(Arc::clone(&fake), |config| {
            config.poll.base_interval = Duration::from_millis(20);
            config.poll.fast_interval = Duration::from_millis(20);
        })
        .await;
        orch.start_session().await.unwrap();
        drain(&mut rx);

        fake.set_stage("STAGE_SOLUTION_REFINEMENT");
        loop {
            match rx.recv().await.unwrap() {
                UiEvent::StageChanged { event } => {
                    assert_eq!(event.previous_stage, Stage::SolutionGeneration);
                    assert_eq!(event.next_stage, Stage::SolutionRefinement);
                    break;
                }
                _ => continue,
            }
        }
        assert!(fake.hits("state") >= 2);
        orch.dispose();
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn typed_manifest_wins_over_flat_listing() {
    timeout(TEST_TIMEOUT, async {
        let fake = FakeServer::new("STAGE_CONSTRAINT_GENERATION");
        *fake.visualizations.lock().unwrap() = vec!["sessions/s-1/constraints_visualization.png".into()];
        *fake.typed_manifests.lock().unwrap() = Some(VecDeque::from([
            json!({}),
            json!({
                "room_graph": "sessions/s-1/graph_v2.png",
                "constraints_table": "sessions/s-1/table_v2.png",
                "layout": "sessions/s-1/layout_v2.png",
            }),
        ]));
        let (orch, mut rx) = setup(Arc::clone(&fake), |_| {}).await;
        orch.start_session().await.unwrap();
        drain(&mut rx);

        let manifest = orch.refresh_visualizations().await.unwrap().unwrap();
        assert!(manifest.room_graph.unwrap().ends_with("/sessions/s-1/graph_v2.png"));
        assert!(manifest.constraints_table.unwrap().ends_with("/sessions/s-1/table_v2.png"));
        assert!(manifest.layout.unwrap().ends_with("/sessions/s-1/layout_v2.png"));

        // The empty first answer was retried, and the listing never consulted
        assert_eq!(fake.hits("check_visualization_files"), 2);
        assert_eq!(fake.hits("visualize"), 0);
        assert!(drain(&mut rx).iter().any(|e| matches!(e, UiEvent::Visualizations { .. })));
        orch.dispose();
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unknown_skip_stage_is_unresolvable() {
    timeout(TEST_TIMEOUT, async {
        let fake = FakeServer::new("STAGE_CONSTRAINT_REFINEMENT");
        let (orch, mut rx) = setup(Arc::clone(&fake), |_| {}).await;
        orch.start_session().await.unwrap();
        drain(&mut rx);

        *fake.skip_answer.lock().unwrap() = Some("STAGE_BOGUS".into());
        let err = orch.skip_stage().await.unwrap_err();
        assert_eq!(err, ApiError::Unresolvable("STAGE_BOGUS".into()));
        assert_eq!(orch.current_stage(), Some(Stage::ConstraintRefinement));

        let events = drain(&mut rx);
        assert!(transitions(&events).is_empty());
        assert!(events.iter().any(|e| matches!(
            e,
            UiEvent::Error { context: ErrorContext::Skip, .. }
        )));
        orch.dispose();
    })
    .await
    .expect("test timed out");
}

/// Accepts connections, reads the request, then hangs up without answering.
async fn start_hangup_server() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            drop(socket);
        }
    });

    (format!("http://127.0.0.1:{port}"), accepted)
}

#[tokio::test]
async fn transport_failures_retry_idempotent_calls_only() {
    timeout(TEST_TIMEOUT, async {
        let (base_url, accepted) = start_hangup_server().await;
        let client = HttpSessionClient::new(&ClientConfig {
            max_retries: 2,
            ..config(base_url)
        })
        .unwrap();

        let err = client.fetch_state(&SessionId::new("s-1")).await.unwrap_err();
        assert!(err.is_transient(), "expected transport error, got {err:?}");
        assert_eq!(accepted.load(Ordering::SeqCst), 3);

        let err = client.send_chat(&SessionId::new("s-1"), "hello").await.unwrap_err();
        assert!(err.is_transient(), "expected transport error, got {err:?}");
        assert_eq!(accepted.load(Ordering::SeqCst), 4, "chat is sent at most once");
    })
    .await
    .expect("test timed out");
}

