//! Tests for stream-json record types.

use claude_cli_provider::cli::{
    tool_result_text, CliRecord, ContentBlock, ContentDelta, FinishReason, PartialEvent, Usage,
    UserContent,
};
use serde_json::json;

#[test]
fn parse_system_init() {
    let line = r#"{"type":"system","subtype":"init","session_id":"abc","model":"claude-sonnet","cwd":"/tmp","tools":["Read","Bash"]}"#;
    let record: CliRecord = serde_json::from_str(line).unwrap();

    assert_eq!(record.session_id(), Some("abc"));
    assert_eq!(record.kind(), "system");
    match record {
        CliRecord::System(init) => {
            assert_eq!(init.subtype.as_deref(), Some("init"));
            assert_eq!(init.tools, vec!["Read", "Bash"]);
        }
        other => panic!("Expected System, got {other:?}"),
    }
}

#[test]
fn parse_assistant_with_tool_use() {
    let line = json!({
        "type": "assistant",
        "session_id": "s1",
        "message": {
            "id": "msg_1",
            "content": [
                {"type": "text", "text": "Looking"},
                {"type": "tool_use", "id": "t1", "name": "Read", "input": {"path": "/a"}}
            ],
            "usage": {"input_tokens": 3, "output_tokens": 4}
        }
    })
    .to_string();
    let record: CliRecord = serde_json::from_str(&line).unwrap();

    let CliRecord::Assistant { message, .. } = record else {
        panic!("Expected Assistant");
    };
    assert_eq!(message.id.as_deref(), Some("msg_1"));
    assert_eq!(message.content.len(), 2);
    assert!(matches!(&message.content[1], ContentBlock::ToolUse { name, .. } if name == "Read"));
    assert_eq!(message.usage.map(|u| u.total()), Some(7));
}

#[test]
fn parse_user_tool_result_blocks() {
    let line = json!({
        "type": "user",
        "message": {
            "content": [
                {"type": "tool_result", "tool_use_id": "t1", "content": "ok", "is_error": false}
            ]
        }
    })
    .to_string();
    let record: CliRecord = serde_json::from_str(&line).unwrap();

    let CliRecord::User { message, .. } = record else {
        panic!("Expected User");
    };
    let UserContent::Blocks(blocks) = message.content else {
        panic!("Expected blocks");
    };
    assert!(matches!(&blocks[0], ContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == "t1"));
}

#[test]
fn parse_user_plain_text() {
    let line = r#"{"type":"user","message":{"content":"hello"}}"#;
    let record: CliRecord = serde_json::from_str(line).unwrap();

    assert!(matches!(
        record,
        CliRecord::User { message, .. } if message.content == UserContent::Text("hello".into())
    ));
}

#[test]
fn parse_partial_text_delta() {
    let line = r#"{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}}"#;
    let record: CliRecord = serde_json::from_str(line).unwrap();

    match record {
        CliRecord::StreamEvent {
            event: PartialEvent::ContentBlockDelta { index, delta },
            ..
        } => {
            assert_eq!(index, 0);
            assert_eq!(delta, ContentDelta::TextDelta { text: "Hi".into() });
        }
        other => panic!("Expected ContentBlockDelta, got {other:?}"),
    }
}

#[test]
fn parse_result_record() {
    let line = r#"{"type":"result","subtype":"success","session_id":"s1","is_error":false,"result":"Done","total_cost_usd":0.05,"duration_ms":1200,"num_turns":2}"#;
    let record: CliRecord = serde_json::from_str(line).unwrap();

    assert!(record.is_terminal());
    let CliRecord::Result(result) = record else {
        panic!("Expected Result");
    };
    assert_eq!(result.subtype, "success");
    assert_eq!(result.result.as_deref(), Some("Done"));
    assert_eq!(result.total_cost_usd, Some(0.05));
    assert_eq!(result.num_turns, Some(2));
}

#[test]
fn parse_flat_records() {
    let text: CliRecord = serde_json::from_str(r#"{"type":"text","text":"Hel"}"#).unwrap();
    assert_eq!(text, CliRecord::Text { text: "Hel".into() });
    assert!(!text.is_terminal());

    let start: CliRecord =
        serde_json::from_str(r#"{"type":"tool_call_start","id":"t1","name":"Bash"}"#).unwrap();
    assert_eq!(start.kind(), "tool_call_start");

    let error: CliRecord =
        serde_json::from_str(r#"{"type":"error","message":"boom","code":"overloaded"}"#).unwrap();
    assert!(error.is_terminal());
}

#[test]
fn parse_done_with_explicit_total() {
    let record: CliRecord =
        serde_json::from_str(r#"{"type":"done","usage":{"tokens":5}}"#).unwrap();

    let CliRecord::Done {
        usage,
        finish_reason,
    } = record
    else {
        panic!("Expected Done");
    };
    let usage = usage.unwrap();
    assert_eq!(usage.total_tokens, Some(5));
    assert_eq!(usage.total(), 5);
    assert_eq!(finish_reason, None);
}

#[test]
fn parse_done_finish_reason() {
    let record: CliRecord =
        serde_json::from_str(r#"{"type":"done","finish_reason":"tool_calls"}"#).unwrap();
    assert!(matches!(
        record,
        CliRecord::Done {
            finish_reason: Some(FinishReason::ToolCalls),
            ..
        }
    ));
}

#[test]
fn unknown_type_is_rejected() {
    let result = serde_json::from_str::<CliRecord>(r#"{"type":"telemetry","x":1}"#);
    assert!(result.is_err());
}

#[test]
fn usage_accumulate_sums_counters_and_cost() {
    let mut total = Usage {
        input_tokens: 10,
        output_tokens: 5,
        cost_usd: Some(0.01),
        ..Default::default()
    };
    total.accumulate(&Usage {
        input_tokens: 1,
        output_tokens: 2,
        cache_read_input_tokens: 3,
        cost_usd: Some(0.02),
        ..Default::default()
    });

    assert_eq!(total.input_tokens, 11);
    assert_eq!(total.output_tokens, 7);
    assert_eq!(total.total(), 21);
    assert_eq!(total.total_tokens, None);
    assert!((total.cost_usd.unwrap() - 0.03).abs() < 1e-9);
}

#[test]
fn usage_accumulate_keeps_explicit_totals() {
    let mut total = Usage {
        total_tokens: Some(5),
        ..Default::default()
    };
    total.accumulate(&Usage {
        input_tokens: 2,
        ..Default::default()
    });
    assert_eq!(total.total_tokens, Some(7));
}

#[test]
fn empty_usage() {
    assert!(Usage::default().is_empty());
    assert!(!Usage {
        cost_usd: Some(0.0),
        ..Default::default()
    }
    .is_empty());
}

#[test]
fn tool_result_text_flattens_blocks() {
    assert_eq!(tool_result_text(&json!("plain")), "plain");
    assert_eq!(tool_result_text(&serde_json::Value::Null), "");
    assert_eq!(
        tool_result_text(&json!([{"type": "text", "text": "a"}, {"type": "text", "text": "b"}])),
        "a\nb"
    );
}
