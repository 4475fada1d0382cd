//! End-to-end tests for the completion helpers and the tool-call loop,
//! driven through a queue-based mock provider.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use llm_mux::mock::MockLlm;
use llm_mux::{
    Balancer, CallContext, ErrorKind, Llm, LlmError, MapToolHandler, MapToolRunner, Messages,
    balancer_complete, complete, complete_json, complete_prompt,
};
use serde_json::Value;

fn echo_runner(invocations: Arc<AtomicUsize>) -> Arc<MapToolRunner> {
    let mut runner = MapToolRunner::new();
    runner.register(
        "echo",
        Arc::new(move |_cx: &CallContext, args: Value| {
            invocations.fetch_add(1, Ordering::SeqCst);
            Ok(args["text"].as_str().unwrap_or_default().to_owned())
        }) as MapToolHandler,
    );
    Arc::new(runner)
}

#[tokio::test]
async fn test_happy_path_returns_content() {
    let llm = MockLlm::new();
    llm.queue_content("hello");

    let cx = CallContext::new();
    let answer = complete_prompt(&cx, &llm, "hi", &[]).await.unwrap();

    assert_eq!(answer, "hello");
    assert_eq!(llm.generate_calls(), 1);
    let body = String::from_utf8(llm.recorded_bodies()[0].clone()).unwrap();
    assert!(body.contains("\"hi\""));
}

#[tokio::test]
async fn test_json_wrapped_answer_unwraps_assistant_field() {
    let llm = MockLlm::new();
    llm.queue_content(r#"{"Assistant": "hello"}"#);

    let cx = CallContext::new();
    let answer = complete_prompt(&cx, &llm, "hi", &[]).await.unwrap();
    assert_eq!(answer, "hello");
}

#[tokio::test]
async fn test_assistant_turn_appended_to_conversation() {
    let llm = MockLlm::new();
    llm.queue_content("first answer");

    let cx = CallContext::new();
    let mut messages = Messages::from_prompt("question");
    complete(&cx, &llm, &mut messages, &[]).await.unwrap();

    assert_eq!(messages.len(), 2);
    assert_eq!(messages.history()[1].content, "first answer");
}

#[tokio::test]
async fn test_empty_conversation_rejected_before_dispatch() {
    let llm = MockLlm::new();
    let cx = CallContext::new();
    let mut messages = Messages::new();

    let err = complete(&cx, &llm, &mut messages, &[]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidRequest);
    assert_eq!(llm.generate_calls(), 0);
}

#[tokio::test]
async fn test_tool_loop_executes_and_reinjects() {
    let llm = MockLlm::new();
    llm.queue_tool_call("echo", r#"{"text":"hi"}"#);
    llm.queue_content("final: hi");

    let invocations = Arc::new(AtomicUsize::new(0));
    let cx = CallContext::new().with_tool_runner(echo_runner(Arc::clone(&invocations)));

    let answer = complete_prompt(&cx, &llm, "run echo", &[]).await.unwrap();

    assert_eq!(answer, "final: hi");
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(llm.generate_calls(), 2);

    // The second request carries the tool results as a user turn.
    let second = String::from_utf8(llm.recorded_bodies()[1].clone()).unwrap();
    assert!(second.contains("\"tool\":\"echo\""));
    assert!(second.contains("\"result\":\"hi\""));
}

#[tokio::test]
async fn test_tool_failure_is_forwarded_not_fatal() {
    let llm = MockLlm::new();
    llm.queue_tool_call("lookup", "{}");
    llm.queue_content("done");

    let mut runner = MapToolRunner::new();
    runner.register(
        "lookup",
        Arc::new(|_cx: &CallContext, _args: Value| {
            Err(LlmError::new(ErrorKind::Unknown, "upstream exploded"))
        }) as MapToolHandler,
    );
    let cx = CallContext::new().with_tool_runner(Arc::new(runner));

    let answer = complete_prompt(&cx, &llm, "look it up", &[]).await.unwrap();
    assert_eq!(answer, "done");

    let second = String::from_utf8(llm.recorded_bodies()[1].clone()).unwrap();
    assert!(second.contains("upstream exploded"));
}

#[tokio::test]
async fn test_missing_tool_runner_aborts_with_count() {
    let llm = MockLlm::new();
    llm.queue_tool_call("echo", r#"{"text":"hi"}"#);

    let cx = CallContext::new();
    let err = complete_prompt(&cx, &llm, "run echo", &[]).await.unwrap_err();

    assert!(err.message.contains("tool runner not configured"));
    assert!(err.message.contains("1 tool(s)"));
    assert_eq!(err.details["abort"], "tool_runner_missing");
    assert_eq!(llm.generate_calls(), 1);
}

#[tokio::test]
async fn test_tools_disallowed_aborts() {
    let llm = MockLlm::new();
    llm.queue_tool_call("echo", "{}");

    let invocations = Arc::new(AtomicUsize::new(0));
    let cx = CallContext::new()
        .with_allow_tools(false)
        .with_tool_runner(echo_runner(Arc::clone(&invocations)));

    let err = complete_prompt(&cx, &llm, "run echo", &[]).await.unwrap_err();
    assert!(err.message.contains("tools not supported"));
    assert!(err.message.contains("echo"));
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_iteration_cap_aborts_endless_tool_loop() {
    let llm = MockLlm::new();
    // The model keeps asking for tools and never settles on text.
    llm.queue_tool_call("echo", r#"{"text":"a"}"#);
    llm.queue_tool_call("echo", r#"{"text":"b"}"#);

    let invocations = Arc::new(AtomicUsize::new(0));
    let cx = CallContext::new()
        .with_max_tool_iterations(1)
        .with_tool_runner(echo_runner(Arc::clone(&invocations)));

    let err = complete_prompt(&cx, &llm, "loop forever", &[])
        .await
        .unwrap_err();

    assert!(err.message.contains("max tool iterations (1)"));
    assert_eq!(err.details["abort"], "max_iterations");
    // Iterations are bounded: cap + 1 generations at most.
    assert_eq!(llm.generate_calls(), 2);
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_transient_generate_error_retried_within_step() {
    let llm = MockLlm::new();
    llm.queue_error(LlmError::new(ErrorKind::Server, "upstream hiccup"));
    llm.queue_content("recovered");

    let cx = CallContext::new();
    let answer = complete_prompt(&cx, &llm, "hi", &[]).await.unwrap();

    assert_eq!(answer, "recovered");
    assert_eq!(llm.generate_calls(), 2);
}

#[tokio::test]
async fn test_terminal_generate_error_propagates_immediately() {
    let llm = MockLlm::new();
    llm.queue_error(LlmError::new(ErrorKind::Unauthorized, "bad key"));

    let cx = CallContext::new();
    let err = complete_prompt(&cx, &llm, "hi", &[]).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Unauthorized);
    assert_eq!(llm.generate_calls(), 1);
}

#[tokio::test]
async fn test_complete_json_parses_object_answer() {
    let llm = MockLlm::new();
    llm.queue_content(r#"{"score": 7, "verdict": "fine"}"#);

    let cx = CallContext::new();
    let mut messages = Messages::from_prompt("rate this");
    let map = complete_json(&cx, &llm, &mut messages, &[]).await.unwrap();

    assert_eq!(map["score"], 7);
    assert_eq!(map["verdict"], "fine");
}

/// A provider that never answers; used to exercise the deadline.
struct StalledLlm;

impl Llm for StalledLlm {
    fn prepare_request(
        &self,
        _messages: &Messages,
        _mutators: &[llm_mux::RequestMutator],
    ) -> Result<Vec<u8>, LlmError> {
        Ok(b"{}".to_vec())
    }

    async fn generate(&self, _cx: &CallContext, _body: &[u8]) -> Result<Value, LlmError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        unreachable!("the deadline must fire first")
    }

    async fn stream(
        &self,
        cx: &CallContext,
        body: &[u8],
        _on_chunk: Option<llm_mux::ChunkHandler>,
    ) -> Result<llm_mux::FinalReceiver, LlmError> {
        let _ = self.generate(cx, body).await?;
        unreachable!()
    }

    fn parse_response(&self, _body: &Value) -> Result<llm_mux::ProviderResponse, LlmError> {
        unreachable!()
    }
}

#[tokio::test(start_paused = true)]
async fn test_deadline_surfaces_as_timeout() {
    let cx = CallContext::new().with_timeout(Duration::from_millis(200));
    let err = complete_prompt(&cx, &StalledLlm, "hi", &[]).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Timeout);
    assert!(err.message.contains("timeout"));
}

#[tokio::test(start_paused = true)]
async fn test_balancer_fails_over_between_providers() {
    let bad = MockLlm::new();
    bad.queue_error(LlmError::new(ErrorKind::Server, "region down"));
    bad.queue_error(LlmError::new(ErrorKind::Server, "region down"));
    bad.queue_error(LlmError::new(ErrorKind::Server, "region down"));
    let good = MockLlm::new();
    good.queue_content("from the healthy node");
    // Either node may be tried first; the healthy one needs a spare
    // answer in case it wins the first slot.
    good.queue_content("from the healthy node");

    let mut pool = Balancer::new();
    pool.add("bad", bad);
    pool.add("good", good);

    let cx = CallContext::new();
    let messages = Messages::from_prompt("hi");
    let answer = balancer_complete(&cx, &pool, &messages, &[]).await.unwrap();
    assert_eq!(answer, "from the healthy node");
}
