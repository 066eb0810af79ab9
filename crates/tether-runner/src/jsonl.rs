// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Extraction of the thread id and assistant reply from `codex exec --json`
//! event streams.

use serde_json::Value;

fn events(output: &str) -> impl Iterator<Item = (String, Value)> + '_ {
    output.lines().filter_map(|line| {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let payload: Value = serde_json::from_str(line).ok()?;
        let name = payload
            .get("type")
            .or_else(|| payload.get("event"))
            .and_then(Value::as_str)?
            .to_string();
        Some((name, payload))
    })
}

fn non_blank(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// The id announced by the last `thread.started` event.
pub fn extract_thread_id(output: &str) -> Option<String> {
    let mut thread_id = None;
    for (name, payload) in events(output) {
        if name != "thread.started" {
            continue;
        }
        if let Some(id) = non_blank(payload.get("thread_id")) {
            thread_id = Some(id);
            continue;
        }
        if let Some(thread) = payload.get("thread") {
            if let Some(id) =
                non_blank(thread.get("id")).or_else(|| non_blank(thread.get("thread_id")))
            {
                thread_id = Some(id);
            }
        }
    }
    thread_id
}

/// The assistant's answer.
///
/// Streamed deltas win when present; otherwise the last completed text,
/// item or response. Empty when the stream carries no answer at all.
pub fn extract_assistant_text(output: &str) -> String {
    let mut deltas = String::new();
    let mut last_complete: Option<String> = None;

    for (name, payload) in events(output) {
        match name.as_str() {
            "response.output_text.delta" => {
                if let Some(delta) = payload.get("delta").and_then(Value::as_str) {
                    deltas.push_str(delta);
                }
            }
            "response.output_text.done" => {
                if let Some(text) = non_blank(payload.get("text")) {
                    last_complete = Some(text);
                }
            }
            "item.completed" => {
                if let Some(text) = payload.get("item").and_then(item_text) {
                    last_complete = Some(text);
                }
            }
            "response.completed" => {
                if let Some(text) = payload.get("response").and_then(response_text) {
                    last_complete = Some(text);
                }
            }
            _ => {}
        }
    }

    let deltas = deltas.trim();
    if !deltas.is_empty() {
        return deltas.to_string();
    }
    last_complete.unwrap_or_default()
}

fn item_text(item: &Value) -> Option<String> {
    let kind = item
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    let role = item
        .get("role")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    if kind == "error" {
        return None;
    }
    let assistant = role == "assistant"
        || matches!(kind.as_str(), "assistant" | "assistant_message" | "message");
    if !assistant {
        return None;
    }
    // Newer CLI builds put the text directly on the item.
    if let Some(text) = non_blank(item.get("text")) {
        return Some(text);
    }
    content_text(item.get("content")?)
}

fn response_text(response: &Value) -> Option<String> {
    response
        .get("output")?
        .as_array()?
        .iter()
        .rev()
        .find_map(item_text)
}

fn content_text(content: &Value) -> Option<String> {
    let parts: Vec<String> = content
        .as_array()?
        .iter()
        .filter(|part| {
            matches!(
                part.get("type").and_then(Value::as_str).map(str::trim),
                Some("text" | "output_text")
            )
        })
        .filter_map(|part| {
            non_blank(part.get("text"))
                .or_else(|| part.get("text").and_then(|t| non_blank(t.get("value"))))
                .or_else(|| non_blank(part.get("value")))
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_id_from_flat_and_nested_events() {
        let out = r#"{"type":"thread.started","thread_id":"thr-1"}"#;
        assert_eq!(extract_thread_id(out).as_deref(), Some("thr-1"));

        let nested = "noise\n{\"event\":\"thread.started\",\"thread\":{\"id\":\"thr-2\"}}\n";
        assert_eq!(extract_thread_id(nested).as_deref(), Some("thr-2"));

        assert!(extract_thread_id(r#"{"type":"turn.started"}"#).is_none());
    }

    #[test]
    fn deltas_take_precedence() {
        let out = [
            r#"{"type":"response.output_text.delta","delta":"Hel"}"#,
            r#"{"type":"response.output_text.delta","delta":"lo"}"#,
            r#"{"type":"response.output_text.done","text":"ignored"}"#,
        ]
        .join("\n");
        assert_eq!(extract_assistant_text(&out), "Hello");
    }

    #[test]
    fn last_completed_item_is_used_without_deltas() {
        let out = [
            r#"{"type":"item.completed","item":{"type":"message","role":"assistant","content":[{"type":"output_text","text":"first"}]}}"#,
            r#"{"type":"item.completed","item":{"type":"reasoning","text":"thinking"}}"#,
            r#"{"type":"item.completed","item":{"type":"agent_message","role":"assistant","text":"second"}}"#,
        ]
        .join("\n");
        assert_eq!(extract_assistant_text(&out), "second");
    }

    #[test]
    fn response_completed_scans_output_backwards() {
        let out = r#"{"type":"response.completed","response":{"output":[
            {"type":"message","role":"assistant","content":[{"type":"text","text":{"value":"answer"}}]},
            {"type":"function_call"}
        ]}}"#
            .replace('\n', " ");
        assert_eq!(extract_assistant_text(&out), "answer");
    }

    #[test]
    fn errors_and_garbage_yield_empty() {
        let out = "not json\n{\"type\":\"item.completed\",\"item\":{\"type\":\"error\",\"role\":\"assistant\",\"text\":\"boom\"}}";
        assert_eq!(extract_assistant_text(out), "");
    }
}
