//! Integration tests for the completion client against a local endpoint.
//!
//! Covers transcript seeding, the repair conversation, request shape and
//! failure classification.

mod common;

use axum::http::StatusCode;
use common::MockEndpoint;
use reel::{CompletionClient, LlmError};
use reel_core::prompt::SCRIPT_SYSTEM_PROMPT;
use reel_core::Role;

fn client(endpoint: &MockEndpoint, two_phase: bool) -> CompletionClient {
    CompletionClient::new(Some("sk-test".to_string()), endpoint.client_config(two_phase)).unwrap()
}

#[tokio::test]
async fn single_phase_seeds_transcript_and_strips_fences() {
    let endpoint = MockEndpoint::start().await;
    endpoint.reply("```python\nfrom manim import *\n\nclass GeneratedScene(Scene):\n    pass\n```");
    let mut client = client(&endpoint, false);

    let code = client
        .request_initial_code("a circle turning into a square", Some("use blue"))
        .await
        .unwrap();

    assert_eq!(
        code,
        "from manim import *\n\nclass GeneratedScene(Scene):\n    pass"
    );

    let transcript = client.transcript().messages();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].role, Role::System);
    assert_eq!(transcript[1].role, Role::User);
    assert!(transcript[1].content.contains("a circle turning into a square"));
    assert!(transcript[1].content.ends_with("use blue"));

    let requests = endpoint.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].authorization.as_deref(), Some("Bearer sk-test"));
    assert_eq!(requests[0].title.as_deref(), Some("reel"));
    assert!(requests[0].referer.is_some());
    assert_eq!(requests[0].body["model"], "test/model");
    assert_eq!(requests[0].body["max_tokens"], 8192);
    assert_eq!(requests[0].messages().len(), 2);
}

#[tokio::test]
async fn two_phase_plans_script_before_code() {
    let endpoint = MockEndpoint::start().await;
    endpoint.reply("TITLE: Circles\n\nHOOK (5 sec):\nWhat is pi?");
    endpoint.reply("from manim import *");
    let mut client = client(&endpoint, true);

    let code = client.request_initial_code("explain pi", None).await.unwrap();
    assert_eq!(code, "from manim import *");

    let requests = endpoint.requests();
    assert_eq!(requests.len(), 2);

    let script_call = requests[0].messages();
    assert_eq!(script_call[0]["content"], SCRIPT_SYSTEM_PROMPT);
    assert!(script_call[1]["content"]
        .as_str()
        .unwrap()
        .contains("explain pi"));

    let code_call = requests[1].messages();
    assert_eq!(code_call.len(), 2);
    assert!(code_call[1]["content"]
        .as_str()
        .unwrap()
        .contains("TITLE: Circles"));

    // The script conversation is not part of the code transcript.
    assert_eq!(client.transcript().len(), 2);
    assert!(client.transcript().messages()[1]
        .content
        .contains("TITLE: Circles"));
}

#[tokio::test]
async fn fixes_grow_transcript_by_two_turns_each() {
    let endpoint = MockEndpoint::start().await;
    endpoint.reply("v1");
    endpoint.reply("```python\nv2\n```");
    endpoint.reply("v3");
    let mut client = client(&endpoint, false);

    let v1 = client.request_initial_code("circles", None).await.unwrap();
    assert_eq!(client.transcript().len(), 2);

    let v2 = client
        .request_fix(&v1, "NameError: name 'Foo' is not defined")
        .await
        .unwrap();
    assert_eq!(v2, "v2");
    assert_eq!(client.transcript().len(), 4);

    let v3 = client.request_fix(&v2, "TypeError: bad argument").await.unwrap();
    assert_eq!(v3, "v3");
    assert_eq!(client.transcript().len(), 6);

    let messages = client.transcript().messages();
    assert_eq!(messages[2].role, Role::Assistant);
    assert_eq!(messages[2].content, "v1");
    assert_eq!(messages[3].role, Role::User);
    assert!(messages[3]
        .content
        .contains("```\nNameError: name 'Foo' is not defined\n```"));
    assert_eq!(messages[4].content, "v2");

    // Each fix call carries the whole conversation so far.
    let requests = endpoint.requests();
    assert_eq!(requests[1].messages().len(), 4);
    assert_eq!(requests[2].messages().len(), 6);
}

#[tokio::test]
async fn new_initial_request_replaces_transcript() {
    let endpoint = MockEndpoint::start().await;
    endpoint.reply("v1");
    endpoint.reply("v2");
    endpoint.reply("fresh");
    let mut client = client(&endpoint, false);

    let v1 = client.request_initial_code("circles", None).await.unwrap();
    client.request_fix(&v1, "error").await.unwrap();
    assert_eq!(client.transcript().len(), 4);

    client.request_initial_code("squares", None).await.unwrap();
    assert_eq!(client.transcript().len(), 2);
    assert!(client.transcript().messages()[1].content.contains("squares"));
}

#[tokio::test]
async fn non_success_status_is_transport_error_with_body() {
    let endpoint = MockEndpoint::start().await;
    endpoint.reply_raw(StatusCode::TOO_MANY_REQUESTS, "rate limited, slow down");
    let mut client = client(&endpoint, false);

    let err = client.request_initial_code("circles", None).await.unwrap_err();

    match err {
        LlmError::Transport { status, body } => {
            assert_eq!(status, 429);
            assert_eq!(body, "rate limited, slow down");
        }
        other => panic!("expected Transport, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_choices_is_protocol_error() {
    let endpoint = MockEndpoint::start().await;
    endpoint.reply_raw(StatusCode::OK, r#"{"id":"gen-1","choices":[]}"#);
    let mut client = client(&endpoint, false);

    let err = client.request_initial_code("circles", None).await.unwrap_err();
    assert!(matches!(err, LlmError::Protocol(_)), "got {err:?}");
}

#[tokio::test]
async fn reasoning_content_used_when_content_is_null() {
    let endpoint = MockEndpoint::start().await;
    endpoint.reply_raw(
        StatusCode::OK,
        r#"{"choices":[{"message":{"content":null,"reasoning_content":"```\nx = 1\n```"}}]}"#,
    );
    let mut client = client(&endpoint, false);

    let code = client.request_initial_code("circles", None).await.unwrap();
    assert_eq!(code, "x = 1");
}

#[tokio::test]
async fn unreachable_endpoint_is_transport_error_without_status() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = reel::ClientConfig {
        base_url: format!("http://{addr}/v1"),
        two_phase: false,
        ..Default::default()
    };
    let mut client = CompletionClient::new(Some("sk-test".to_string()), config).unwrap();

    let err = client.request_initial_code("circles", None).await.unwrap_err();
    assert!(
        matches!(err, LlmError::Transport { status: 0, .. }),
        "got {err:?}"
    );
}
