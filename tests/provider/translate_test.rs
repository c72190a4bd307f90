//! Tests for record-to-event translation.

use claude_cli_provider::cli::{CliRecord, FinishReason, StreamParser, Usage};
use claude_cli_provider::provider::{ErrorKind, EventTranslator, ProtocolViolation, StreamEvent};
use serde_json::json;

fn record(value: &serde_json::Value) -> CliRecord {
    StreamParser::parse_line(&value.to_string()).unwrap()
}

fn translate_all(records: &[serde_json::Value]) -> Vec<StreamEvent> {
    let mut translator = EventTranslator::new();
    records
        .iter()
        .flat_map(|r| translator.translate(record(r)).unwrap())
        .collect()
}

fn text(s: &str) -> StreamEvent {
    StreamEvent::TextDelta { text: s.into() }
}

#[test]
fn flat_text_then_done() {
    let events = translate_all(&[
        json!({"type": "text", "text": "Hel"}),
        json!({"type": "text", "text": "lo"}),
        json!({"type": "done", "usage": {"tokens": 5}}),
    ]);

    assert_eq!(
        events,
        vec![
            text("Hel"),
            text("lo"),
            StreamEvent::Finish {
                reason: FinishReason::Stop,
                usage: Usage {
                    total_tokens: Some(5),
                    ..Default::default()
                },
            },
        ]
    );
}

#[test]
fn empty_text_is_dropped() {
    let events = translate_all(&[json!({"type": "text", "text": ""})]);
    assert!(events.is_empty());
}

#[test]
fn session_info_is_emitted_once_per_id() {
    let events = translate_all(&[
        json!({"type": "system", "subtype": "init", "session_id": "s1"}),
        json!({"type": "assistant", "session_id": "s1", "message": {"content": []}}),
        json!({"type": "system", "subtype": "init", "session_id": "s2"}),
    ]);

    assert_eq!(
        events,
        vec![
            StreamEvent::SessionInfo { session_id: "s1".into() },
            StreamEvent::SessionInfo { session_id: "s2".into() },
        ]
    );
}

#[test]
fn envelope_conversation_with_tool_use() {
    let events = translate_all(&[
        json!({"type": "system", "subtype": "init", "session_id": "s1"}),
        json!({
            "type": "assistant",
            "session_id": "s1",
            "message": {
                "id": "m1",
                "content": [
                    {"type": "text", "text": "Let me look"},
                    {"type": "tool_use", "id": "t1", "name": "Read", "input": {"path": "/a"}}
                ],
                "usage": {"input_tokens": 10, "output_tokens": 5}
            }
        }),
        json!({
            "type": "user",
            "session_id": "s1",
            "message": {"content": [{"type": "tool_result", "tool_use_id": "t1", "content": "file body"}]}
        }),
        json!({
            "type": "result",
            "subtype": "success",
            "session_id": "s1",
            "total_cost_usd": 0.02,
            "usage": {"input_tokens": 12, "output_tokens": 7}
        }),
    ]);

    assert_eq!(
        events,
        vec![
            StreamEvent::SessionInfo { session_id: "s1".into() },
            text("Let me look"),
            StreamEvent::ToolCallStart { id: "t1".into(), name: "Read".into() },
            StreamEvent::ToolCallDelta {
                id: "t1".into(),
                input_delta: r#"{"path":"/a"}"#.into(),
            },
            StreamEvent::ToolCallEnd { id: "t1".into() },
            StreamEvent::Usage {
                usage: Usage {
                    input_tokens: 10,
                    output_tokens: 5,
                    ..Default::default()
                },
            },
            StreamEvent::ToolResult {
                id: "t1".into(),
                content: "file body".into(),
                is_error: false,
            },
            StreamEvent::Finish {
                reason: FinishReason::Stop,
                usage: Usage {
                    input_tokens: 12,
                    output_tokens: 7,
                    cost_usd: Some(0.02),
                    ..Default::default()
                },
            },
        ]
    );
}

#[test]
fn partial_messages_are_not_duplicated_by_envelopes() {
    let events = translate_all(&[
        json!({"type": "stream_event", "event": {"type": "message_start", "message": {}}}),
        json!({"type": "stream_event", "event": {"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}}),
        json!({"type": "stream_event", "event": {"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hi"}}}),
        json!({"type": "stream_event", "event": {"type": "content_block_stop", "index": 0}}),
        json!({"type": "stream_event", "event": {"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": "t1", "name": "Bash", "input": {}}}}),
        json!({"type": "stream_event", "event": {"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"cmd\":"}}}),
        json!({"type": "stream_event", "event": {"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "\"ls\"}"}}}),
        json!({"type": "stream_event", "event": {"type": "content_block_stop", "index": 1}}),
        json!({
            "type": "assistant",
            "message": {
                "id": "m1",
                "content": [
                    {"type": "text", "text": "Hi"},
                    {"type": "tool_use", "id": "t1", "name": "Bash", "input": {"cmd": "ls"}}
                ]
            }
        }),
        json!({"type": "stream_event", "event": {"type": "message_stop"}}),
    ]);

    assert_eq!(
        events,
        vec![
            text("Hi"),
            StreamEvent::ToolCallStart { id: "t1".into(), name: "Bash".into() },
            StreamEvent::ToolCallDelta { id: "t1".into(), input_delta: "{\"cmd\":".into() },
            StreamEvent::ToolCallDelta { id: "t1".into(), input_delta: "\"ls\"}".into() },
            StreamEvent::ToolCallEnd { id: "t1".into() },
        ]
    );
}

#[test]
fn repeated_envelope_usage_is_counted_once() {
    let envelope = json!({
        "type": "assistant",
        "message": {"id": "m1", "content": [], "usage": {"input_tokens": 4, "output_tokens": 1}}
    });
    let events = translate_all(&[envelope.clone(), envelope]);

    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], StreamEvent::Usage { usage } if usage.total() == 5));
}

#[test]
fn flat_usage_records_accumulate() {
    let mut translator = EventTranslator::new();
    translator
        .translate(record(&json!({"type": "usage", "usage": {"input_tokens": 1}})))
        .unwrap();
    let events = translator
        .translate(record(&json!({"type": "usage", "usage": {"input_tokens": 2, "output_tokens": 3}})))
        .unwrap();

    assert!(matches!(
        &events[..],
        [StreamEvent::Usage { usage }] if usage.input_tokens == 3 && usage.output_tokens == 3
    ));

    let events = translator.translate(record(&json!({"type": "done"}))).unwrap();
    assert!(matches!(
        &events[..],
        [StreamEvent::Finish { usage, .. }] if usage.total() == 6
    ));
}

#[test]
fn flat_tool_call_lifecycle() {
    let events = translate_all(&[
        json!({"type": "tool_call_start", "id": "t1", "name": "Bash"}),
        json!({"type": "tool_call_delta", "id": "t1", "input_delta": "{}"}),
        json!({"type": "tool_call_end", "id": "t1"}),
        json!({"type": "tool_result", "id": "t1", "content": [{"type": "text", "text": "out"}], "is_error": true}),
        json!({"type": "done", "finish_reason": "tool_calls"}),
    ]);

    assert_eq!(events.len(), 5);
    assert_eq!(
        events[3],
        StreamEvent::ToolResult { id: "t1".into(), content: "out".into(), is_error: true }
    );
    assert!(matches!(
        events[4],
        StreamEvent::Finish { reason: FinishReason::ToolCalls, .. }
    ));
}

#[test]
fn max_turns_result_finishes_with_length() {
    let events = translate_all(&[json!({
        "type": "result",
        "subtype": "error_max_turns",
        "is_error": true,
        "num_turns": 3
    })]);
    assert!(matches!(
        events[..],
        [StreamEvent::Finish { reason: FinishReason::Length, .. }]
    ));
}

#[test]
fn error_result_is_classified() {
    let events = translate_all(&[json!({
        "type": "result",
        "subtype": "success",
        "session_id": "s9",
        "is_error": true,
        "result": "Invalid API key · Please run /login"
    })]);

    let [StreamEvent::SessionInfo { .. }, StreamEvent::Error { error }] = &events[..] else {
        panic!("unexpected events: {events:?}");
    };
    assert_eq!(error.kind, ErrorKind::AuthenticationError);
    assert_eq!(error.metadata.session_id.as_deref(), Some("s9"));
}

#[test]
fn error_record_becomes_terminal_error() {
    let events = translate_all(&[json!({"type": "error", "message": "Overloaded"})]);
    let [StreamEvent::Error { error }] = &events[..] else {
        panic!("unexpected events: {events:?}");
    };
    assert_eq!(error.kind, ErrorKind::ApiCallError);
    assert_eq!(error.message, "Overloaded");
    assert!(events[0].is_terminal());
}

#[test]
fn delta_for_unopened_tool_call_is_a_violation() {
    let mut translator = EventTranslator::new();
    let err = translator
        .translate(record(&json!({"type": "tool_call_delta", "id": "t9", "input_delta": "{}"})))
        .unwrap_err();
    assert_eq!(err, ProtocolViolation::ToolCallNotOpen { id: "t9".into() });
}

#[test]
fn duplicate_tool_call_is_a_violation() {
    let mut translator = EventTranslator::new();
    let start = json!({"type": "tool_call_start", "id": "t1", "name": "Bash"});
    translator.translate(record(&start)).unwrap();
    assert_eq!(
        translator.translate(record(&start)).unwrap_err(),
        ProtocolViolation::DuplicateToolCall { id: "t1".into() }
    );
}

#[test]
fn result_before_end_is_a_violation() {
    let mut translator = EventTranslator::new();
    translator
        .translate(record(&json!({"type": "tool_call_start", "id": "t1", "name": "Bash"})))
        .unwrap();
    assert_eq!(
        translator
            .translate(record(&json!({"type": "tool_result", "id": "t1", "content": "x"})))
            .unwrap_err(),
        ProtocolViolation::ResultBeforeEnd { id: "t1".into() }
    );
}

#[test]
fn result_for_unknown_call_is_a_violation() {
    let mut translator = EventTranslator::new();
    assert_eq!(
        translator
            .translate(record(&json!({"type": "tool_result", "id": "ghost", "content": "x"})))
            .unwrap_err(),
        ProtocolViolation::UnknownToolResult { id: "ghost".into() }
    );
}

#[test]
fn finish_with_open_tool_calls_is_a_violation() {
    let mut translator = EventTranslator::new();
    for id in ["b", "a"] {
        translator
            .translate(record(&json!({"type": "tool_call_start", "id": id, "name": "Bash"})))
            .unwrap();
    }
    assert_eq!(
        translator.translate(record(&json!({"type": "done"}))).unwrap_err(),
        ProtocolViolation::UnterminatedToolCalls { ids: vec!["a".into(), "b".into()] }
    );
}

#[test]
fn input_delta_for_text_block_is_a_violation() {
    let mut translator = EventTranslator::new();
    let delta = json!({
        "type": "stream_event",
        "event": {"type": "content_block_delta", "index": 0, "delta": {"type": "input_json_delta", "partial_json": "{"}}
    });
    assert_eq!(
        translator.translate(record(&delta)).unwrap_err(),
        ProtocolViolation::UnknownContentBlock { index: 0 }
    );
}
