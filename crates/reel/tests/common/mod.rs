//! Local chat-completions endpoint for integration tests.

#![allow(dead_code)]

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use reel::ClientConfig;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// A request seen by the mock endpoint.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub authorization: Option<String>,
    pub title: Option<String>,
    pub referer: Option<String>,
    pub body: Value,
}

impl RecordedRequest {
    pub fn messages(&self) -> &[Value] {
        self.body["messages"].as_array().unwrap()
    }
}

#[derive(Default)]
struct MockState {
    responses: VecDeque<(StatusCode, String)>,
    requests: Vec<RecordedRequest>,
}

/// Endpoint answering `POST /v1/chat/completions` with queued responses.
pub struct MockEndpoint {
    addr: SocketAddr,
    state: Arc<Mutex<MockState>>,
}

impl MockEndpoint {
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(MockState::default()));
        let app = Router::new()
            .route("/v1/chat/completions", post(chat_completions))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    /// Client config pointing at this endpoint.
    pub fn client_config(&self, two_phase: bool) -> ClientConfig {
        ClientConfig {
            base_url: self.base_url(),
            model: "test/model".to_string(),
            two_phase,
            ..Default::default()
        }
    }

    /// Queue a successful completion whose assistant content is `content`.
    pub fn reply(&self, content: &str) {
        let body = json!({
            "id": "gen-test",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
        });
        self.reply_raw(StatusCode::OK, &body.to_string());
    }

    pub fn reply_raw(&self, status: StatusCode, body: &str) {
        self.state
            .lock()
            .unwrap()
            .responses
            .push_back((status, body.to_string()));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }
}

async fn chat_completions(
    State(state): State<Arc<Mutex<MockState>>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, String) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let mut state = state.lock().unwrap();
    state.requests.push(RecordedRequest {
        authorization: header("authorization"),
        title: header("x-title"),
        referer: header("http-referer"),
        body,
    });
    state.responses.pop_front().unwrap_or((
        StatusCode::INTERNAL_SERVER_ERROR,
        "no response queued".to_string(),
    ))
}
