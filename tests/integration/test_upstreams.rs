//! Integration tests for the HTTP upstream clients.
//!
//! The Gemini, OpenAI and Supabase clients are pointed at in-process axum
//! servers that mimic the relevant slice of each API.

use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use mathcoach_server::{
    create_router, AppState, Config, GeminiGenerator, LlmErrorKind, OpenAiGenerator, Problem,
    SessionId, SessionStore, Submission, SupabaseStore, TextGenerator,
};
use serde_json::{json, Value};

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Serves `router` on an ephemeral port and returns its base URL.
async fn serve(router: Router) -> String {
    let port = find_available_port();
    let addr = format!("127.0.0.1:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    format!("http://{addr}")
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .expect("client")
}

// ============================================================================
// Fake Gemini
// ============================================================================

#[derive(Clone, Default)]
struct FakeLlm {
    replies: Arc<Mutex<Vec<(StatusCode, Value)>>>,
    requests: Arc<Mutex<Vec<(String, HeaderMap, Value)>>>,
}

impl FakeLlm {
    fn reply(self, status: StatusCode, body: Value) -> Self {
        self.replies.lock().expect("lock").push((status, body));
        self
    }

    fn next(&self, path: String, headers: HeaderMap, body: Value) -> (StatusCode, Json<Value>) {
        self.requests.lock().expect("lock").push((path, headers, body));
        let mut replies = self.replies.lock().expect("lock");
        if replies.is_empty() {
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "no reply"})));
        }
        let (status, body) = replies.remove(0);
        (status, Json(body))
    }
}

async fn gemini_handler(
    State(fake): State<FakeLlm>,
    Path(call): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    fake.next(call, headers, body)
}

async fn chat_handler(
    State(fake): State<FakeLlm>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    fake.next("chat/completions".to_string(), headers, body)
}

fn gemini_text(text: &str) -> Value {
    json!({"candidates": [{"content": {"parts": [{"text": text}], "role": "model"}}]})
}

async fn spawn_gemini(fake: &FakeLlm) -> String {
    let router = Router::new()
        .route("/v1beta/models/:call", post(gemini_handler))
        .with_state(fake.clone());
    serve(router).await
}

#[tokio::test]
async fn test_gemini_generate_sends_key_and_prompt() {
    let fake = FakeLlm::default().reply(StatusCode::OK, gemini_text("  Hello there!  "));
    let base = spawn_gemini(&fake).await;
    let generator = GeminiGenerator::new(http_client(), base, "gemini-2.5-flash", "secret-key");

    let text = generator.generate("Say hello").await.expect("generate");

    assert_eq!(text, "Hello there!");
    let requests = fake.requests.lock().expect("lock");
    let (call, headers, body) = &requests[0];
    assert_eq!(call, "gemini-2.5-flash:generateContent");
    assert_eq!(headers["x-goog-api-key"], "secret-key");
    assert_eq!(body["contents"][0]["parts"][0]["text"], json!("Say hello"));
}

#[tokio::test]
async fn test_gemini_joins_multiple_parts() {
    let reply = json!({"candidates": [{"content": {"parts": [{"text": "```json\n"}, {"text": "{}\n```"}]}}]});
    let fake = FakeLlm::default().reply(StatusCode::OK, reply);
    let base = spawn_gemini(&fake).await;
    let generator = GeminiGenerator::new(http_client(), base, "gemini-2.5-flash", "k");

    let text = generator.generate("p").await.expect("generate");
    assert_eq!(text, "```json\n{}\n```");
}

#[tokio::test]
async fn test_gemini_error_statuses_are_classified() {
    let fake = FakeLlm::default()
        .reply(StatusCode::UNAUTHORIZED, json!({"error": {"message": "API key not valid"}}))
        .reply(StatusCode::TOO_MANY_REQUESTS, json!({"error": {"message": "quota"}}))
        .reply(StatusCode::SERVICE_UNAVAILABLE, json!({"error": {"message": "overloaded"}}));
    let base = spawn_gemini(&fake).await;
    let generator = GeminiGenerator::new(http_client(), base, "gemini-2.5-flash", "k");

    let kinds = [
        LlmErrorKind::Authentication,
        LlmErrorKind::RateLimit,
        LlmErrorKind::Server,
    ];
    for expected in kinds {
        let err = generator.generate("p").await.expect_err("should fail");
        assert_eq!(err.kind, expected);
    }
}

#[tokio::test]
async fn test_gemini_empty_candidates_is_an_error() {
    let fake = FakeLlm::default().reply(StatusCode::OK, json!({"candidates": []}));
    let base = spawn_gemini(&fake).await;
    let generator = GeminiGenerator::new(http_client(), base, "gemini-2.5-flash", "k");

    let err = generator.generate("p").await.expect_err("should fail");
    assert_eq!(err.kind, LlmErrorKind::Other);
    assert!(err.message.contains("empty response"));
}

#[tokio::test]
async fn test_unreachable_upstream_is_network_error() {
    let port = find_available_port();
    let generator = GeminiGenerator::new(
        http_client(),
        format!("http://127.0.0.1:{port}"),
        "gemini-2.5-flash",
        "k",
    );

    let err = generator.generate("p").await.expect_err("should fail");
    assert_eq!(err.kind, LlmErrorKind::Network);
}

// ============================================================================
// Fake OpenAI
// ============================================================================

#[tokio::test]
async fn test_openai_generate_uses_bearer_auth() {
    let fake = FakeLlm::default().reply(
        StatusCode::OK,
        json!({"choices": [{"index": 0, "message": {"role": "assistant", "content": "Nice effort!\n"}}]}),
    );
    let router = Router::new()
        .route("/v1/chat/completions", post(chat_handler))
        .with_state(fake.clone());
    let base = serve(router).await;
    let generator = OpenAiGenerator::new(http_client(), format!("{base}/v1"), "gpt-4o-mini", "sk-test");

    let text = generator.generate("Give feedback").await.expect("generate");

    assert_eq!(text, "Nice effort!");
    let requests = fake.requests.lock().expect("lock");
    let (_, headers, body) = &requests[0];
    assert_eq!(headers["authorization"], "Bearer sk-test");
    assert_eq!(body["model"], json!("gpt-4o-mini"));
    assert_eq!(body["messages"][0], json!({"role": "user", "content": "Give feedback"}));
}

// ============================================================================
// Fake Supabase (PostgREST)
// ============================================================================

#[derive(Clone, Default)]
struct FakePostgrest {
    tables: Arc<Mutex<HashMap<String, Vec<Value>>>>,
    next_id: Arc<Mutex<u32>>,
    prefer_headers: Arc<Mutex<Vec<String>>>,
    select_columns: Arc<Mutex<Vec<String>>>,
}

impl FakePostgrest {
    fn rows(&self, table: &str) -> Vec<Value> {
        self.tables
            .lock()
            .expect("lock")
            .get(table)
            .cloned()
            .unwrap_or_default()
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers.get("apikey").and_then(|v| v.to_str().ok()) == Some("anon-key")
        && headers.get("authorization").and_then(|v| v.to_str().ok()) == Some("Bearer anon-key")
}

async fn postgrest_insert(
    State(fake): State<FakePostgrest>,
    Path(table): Path<String>,
    headers: HeaderMap,
    Json(mut row): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"message": "Invalid API key"})));
    }
    let prefer = headers
        .get("prefer")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    fake.prefer_headers.lock().expect("lock").push(prefer.clone());

    let id = {
        let mut next = fake.next_id.lock().expect("lock");
        *next += 1;
        format!("00000000-0000-0000-0000-{:012}", *next)
    };
    row["id"] = json!(id);
    // Plain `timestamp` column: no offset in the rendered value.
    row["created_at"] = json!("2025-09-01T10:00:00.123456");
    fake.tables
        .lock()
        .expect("lock")
        .entry(table)
        .or_default()
        .push(row);

    if prefer == "return=representation" {
        (StatusCode::CREATED, Json(json!([{"id": id}])))
    } else {
        (StatusCode::CREATED, Json(Value::Null))
    }
}

async fn postgrest_select(
    State(fake): State<FakePostgrest>,
    Path(table): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    let Some(id) = query.get("id").and_then(|f| f.strip_prefix("eq.")) else {
        return (StatusCode::BAD_REQUEST, Json(json!({"message": "missing filter"})));
    };
    if id.len() != 36 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"code": "22P02", "message": "invalid input syntax for type uuid"})),
        );
    }
    if let Some(columns) = query.get("select") {
        fake.select_columns.lock().expect("lock").push(columns.clone());
    }
    let rows: Vec<Value> = fake
        .rows(&table)
        .into_iter()
        .filter(|row| row["id"] == json!(id))
        .collect();
    (StatusCode::OK, Json(Value::Array(rows)))
}

async fn spawn_postgrest(fake: &FakePostgrest) -> String {
    let router = Router::new()
        .route(
            "/rest/v1/:table",
            post(postgrest_insert).get(postgrest_select),
        )
        .with_state(fake.clone());
    serve(router).await
}

fn supabase(base: &str, anon_key: &str) -> SupabaseStore {
    SupabaseStore::new(
        http_client(),
        base,
        anon_key,
        "math_problem_sessions",
        "math_problem_submissions",
    )
}

fn pencils() -> Problem {
    Problem {
        problem_text: "A shop sold 120 pencils.".to_string(),
        correct_answer: 80.0,
    }
}

#[tokio::test]
async fn test_supabase_session_round_trip() {
    let fake = FakePostgrest::default();
    let base = spawn_postgrest(&fake).await;
    let store = supabase(&base, "anon-key");

    let session = store.insert_session(&pencils()).await.expect("insert");
    assert_eq!(session.id.as_str(), "00000000-0000-0000-0000-000000000001");

    let fetched = store
        .get_session(&session.id)
        .await
        .expect("lookup")
        .expect("session exists");
    assert_eq!(fetched.problem, pencils());
    assert_eq!(
        fetched.created_at.to_rfc3339(),
        "2025-09-01T10:00:00.123456+00:00"
    );

    let columns = fake.select_columns.lock().expect("lock").clone();
    assert_eq!(columns, vec!["id,problem_text,correct_answer,created_at"]);

    let rows = fake.rows("math_problem_sessions");
    assert_eq!(rows[0]["problem_text"], json!("A shop sold 120 pencils."));
    assert_eq!(rows[0]["correct_answer"], json!(80.0));
}

#[tokio::test]
async fn test_supabase_lookup_misses() {
    let fake = FakePostgrest::default();
    let base = spawn_postgrest(&fake).await;
    let store = supabase(&base, "anon-key");

    let missing = store
        .get_session(&SessionId::new("00000000-0000-0000-0000-000000000099"))
        .await
        .expect("lookup");
    assert!(missing.is_none());

    let malformed = store
        .get_session(&SessionId::new("not-a-uuid"))
        .await
        .expect("lookup");
    assert!(malformed.is_none());
}

#[tokio::test]
async fn test_supabase_submission_insert() {
    let fake = FakePostgrest::default();
    let base = spawn_postgrest(&fake).await;
    let store = supabase(&base, "anon-key");

    let session = store.insert_session(&pencils()).await.expect("insert");
    let submission = Submission::grade(&session, 79.98, "Almost there!");
    store.insert_submission(&submission).await.expect("insert");

    let rows = fake.rows("math_problem_submissions");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["session_id"], json!(session.id.as_str()));
    assert_eq!(rows[0]["user_answer"], json!(79.98));
    assert_eq!(rows[0]["is_correct"], json!(false));
    assert_eq!(rows[0]["feedback_text"], json!("Almost there!"));

    let prefer = fake.prefer_headers.lock().expect("lock").clone();
    assert_eq!(prefer, vec!["return=representation", "return=minimal"]);
}

#[tokio::test]
async fn test_supabase_rejects_bad_key() {
    let fake = FakePostgrest::default();
    let base = spawn_postgrest(&fake).await;
    let store = supabase(&base, "wrong-key");

    let err = store.insert_session(&pencils()).await.expect_err("should fail");
    assert!(err.to_string().contains("401"));
    assert!(fake.rows("math_problem_sessions").is_empty());
}

// ============================================================================
// Full stack over fakes
// ============================================================================

#[tokio::test]
async fn test_full_stack_against_fake_upstreams() {
    let llm = FakeLlm::default()
        .reply(
            StatusCode::OK,
            gemini_text("```json\n{\"problem_text\": \"A shop sold 120 pencils.\", \"correct_answer\": 80}\n```"),
        )
        .reply(StatusCode::OK, gemini_text("Excellent work!"));
    let llm_base = spawn_gemini(&llm).await;
    let postgrest = FakePostgrest::default();
    let db_base = spawn_postgrest(&postgrest).await;

    let generator: Arc<dyn TextGenerator> = Arc::new(GeminiGenerator::new(
        http_client(),
        llm_base,
        "gemini-2.5-flash",
        "k",
    ));
    let store: Arc<dyn SessionStore> = Arc::new(supabase(&db_base, "anon-key"));
    let app = serve(create_router(AppState::new(Config::default(), generator, store))).await;
    let client = http_client();

    let generated: Value = client
        .post(format!("{app}/api/math-problem"))
        .json(&json!({"action": "generate"}))
        .send()
        .await
        .expect("generate")
        .json()
        .await
        .expect("json");
    let session_id = generated["sessionId"].as_str().expect("sessionId");

    let outcome: Value = client
        .post(format!("{app}/api/math-problem"))
        .json(&json!({"action": "submit", "sessionId": session_id, "userAnswer": 80}))
        .send()
        .await
        .expect("submit")
        .json()
        .await
        .expect("json");

    assert_eq!(outcome, json!({"isCorrect": true, "feedback": "Excellent work!"}));
    assert_eq!(postgrest.rows("math_problem_submissions").len(), 1);

    let health: Value = client
        .get(format!("{app}/api/health"))
        .send()
        .await
        .expect("health")
        .json()
        .await
        .expect("json");
    assert_eq!(health["generator"], json!("gemini"));
    assert_eq!(health["store"], json!("supabase"));
}
