//! High-level completion helpers.
//!
//! [`complete`] is the one call most applications need: prepare the
//! request, drive the generate/tool loop, post-process the answer, and
//! append it to the conversation — all under the context's deadline.
//! [`complete_json`] additionally parses the answer as a JSON object.

use serde_json::Value;

use crate::context::CallContext;
use crate::driver::Interaction;
use crate::error::{ErrorKind, LlmError};
use crate::message::Messages;
use crate::provider::{JsonMap, Llm, RequestMutator};

/// Sends the conversation to the model and returns the final answer.
///
/// Runs the full tool-call loop when the model requests tools. On
/// success the assistant's answer is appended to `messages`, so the
/// same conversation can be sent again for the next turn. The whole
/// call is bounded by [`CallContext::effective_timeout`].
pub async fn complete<L: Llm>(
    cx: &CallContext,
    llm: &L,
    messages: &mut Messages,
    mutators: &[RequestMutator],
) -> Result<String, LlmError> {
    let deadline = cx.effective_timeout();
    match tokio::time::timeout(deadline, complete_inner(cx, llm, messages, mutators)).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::new(
            ErrorKind::Timeout,
            format!("LLM request timeout after {deadline:?}"),
        )),
    }
}

async fn complete_inner<L: Llm>(
    cx: &CallContext,
    llm: &L,
    messages: &mut Messages,
    mutators: &[RequestMutator],
) -> Result<String, LlmError> {
    if messages.is_empty() {
        return Err(LlmError::new(
            ErrorKind::InvalidRequest,
            "conversation is empty",
        ));
    }

    let body = llm.prepare_request(messages, mutators)?;
    let content = Interaction::new(cx, llm, messages, body, mutators)
        .execute()
        .await?;
    messages.append_assistant(&content);
    Ok(content)
}

/// One-shot convenience: completes a bare prompt.
pub async fn complete_prompt<L: Llm>(
    cx: &CallContext,
    llm: &L,
    prompt: &str,
    mutators: &[RequestMutator],
) -> Result<String, LlmError> {
    let mut messages = Messages::from_prompt(prompt);
    complete(cx, llm, &mut messages, mutators).await
}

/// Like [`complete`], parsing the answer as a JSON object.
pub async fn complete_json<L: Llm>(
    cx: &CallContext,
    llm: &L,
    messages: &mut Messages,
    mutators: &[RequestMutator],
) -> Result<JsonMap, LlmError> {
    let text = complete(cx, llm, messages, mutators).await?;
    Ok(parse_json_response(&text))
}

/// Parses a model answer as a JSON object.
///
/// Never fails: tolerates surrounding whitespace, and an answer that is
/// not a JSON object is wrapped into a single-entry map under the
/// `response` key.
pub fn parse_json_response(response: &str) -> JsonMap {
    let trimmed = response.trim();
    if trimmed.len() > 2 && trimmed.starts_with('{') && trimmed.ends_with('}') {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
            return map;
        }
    }
    let mut map = JsonMap::new();
    map.insert("response".into(), Value::String(response.to_owned()));
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_response_object() {
        let map = parse_json_response(r#" {"a": 1, "b": "x"} "#);
        assert_eq!(map["a"], 1);
        assert_eq!(map["b"], "x");
    }

    #[test]
    fn test_parse_json_response_plain_text_wrapped() {
        let map = parse_json_response("just text");
        assert_eq!(map["response"], "just text");
    }

    #[test]
    fn test_parse_json_response_array_wrapped() {
        let map = parse_json_response("[1,2]");
        assert_eq!(map["response"], "[1,2]");
    }

    #[test]
    fn test_parse_json_response_malformed_object_wrapped() {
        let map = parse_json_response("{not json}");
        assert_eq!(map["response"], "{not json}");
    }
}
