//! Convert Kiro event payloads into Anthropic Messages API responses / SSE.
//!
//! [`ResponseAccumulator::process_payload`] classifies each decoded
//! event-stream payload by shape and drives a strict content-block state
//! machine: at most one block open at a time, each `content_block_start`
//! paired with a later `content_block_stop`, indices strictly increasing,
//! and a text block always closed before a tool_use block opens at the
//! next index. `<thinking>...</thinking>` tags inside `content` payloads
//! are extracted in-stream into their own thinking block, tolerating a tag
//! split across chunk boundaries.

use std::collections::HashSet;

use regex_lite::Regex;
use uuid::Uuid;

use crate::config::{CONTEXT_USAGE_FULL_TOKENS, USAGE_DISTRIBUTION_MIN_TOTAL, USAGE_DISTRIBUTION_PARTS};
use crate::models::response::{MessagesResponse, ResponseContentBlock, StopReason, Usage};
use crate::models::stream::{ContentDelta, MessageDelta, PartialMessage, StreamEvent};

const THINKING_OPEN: &str = "<thinking>";
const THINKING_CLOSE: &str = "</thinking>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    Thinking,
    ToolUse,
}

struct ToolUseAccumulator {
    id: String,
    name: String,
    input_json: String,
}

/// Accumulates Kiro event payloads into a complete Messages response, and/or
/// yields Anthropic SSE stream events as they become available.
pub struct ResponseAccumulator {
    id: String,
    model: String,

    text: String,
    thinking: Option<String>,
    tool_uses: Vec<ToolUseAccumulator>,

    current_block: Option<BlockKind>,
    current_tool: Option<ToolUseAccumulator>,
    next_index: usize,

    in_thinking: bool,
    text_scan_buffer: String,

    legacy_tool_calls_seen: HashSet<(String, String)>,

    input_tokens: u32,
    output_tokens: u32,
    context_usage_pct: Option<f64>,

    was_message_delta_emitted: bool,
}

impl ResponseAccumulator {
    /// Create a new accumulator for the given model.
    pub fn new(model: &str) -> Self {
        Self {
            id: format!("msg_{}", Uuid::new_v4().simple()),
            model: model.to_string(),
            text: String::new(),
            thinking: None,
            tool_uses: Vec::new(),
            current_block: None,
            current_tool: None,
            next_index: 0,
            in_thinking: false,
            text_scan_buffer: String::new(),
            legacy_tool_calls_seen: HashSet::new(),
            input_tokens: 0,
            output_tokens: 0,
            context_usage_pct: None,
            was_message_delta_emitted: false,
        }
    }

    /// Classify a decoded event payload and return any Anthropic stream
    /// events it produces.
    pub fn process_payload(&mut self, payload: &serde_json::Value) -> Vec<StreamEvent> {
        if let Some(content) = payload.get("content").and_then(|v| v.as_str()) {
            return self.process_content(content);
        }
        if payload.get("name").is_some() {
            return self.process_tool_start(payload);
        }
        if let Some(input) = payload.get("input").and_then(|v| v.as_str()) {
            return self.process_tool_input(input);
        }
        if payload.get("stop").is_some() {
            return self.process_tool_stop();
        }
        if let Some(pct) = payload.get("contextUsagePercentage").and_then(|v| v.as_f64()) {
            self.context_usage_pct = Some(pct);
            self.reconstruct_usage_from_context_pct(pct);
            return Vec::new();
        }
        Vec::new()
    }

    fn process_content(&mut self, chunk: &str) -> Vec<StreamEvent> {
        self.text_scan_buffer.push_str(chunk);
        let mut events = Vec::new();

        loop {
            if self.in_thinking {
                match find_tag(&self.text_scan_buffer, THINKING_CLOSE) {
                    Some((before, after)) => {
                        if !before.is_empty() {
                            events.extend(self.emit_thinking(&before));
                        }
                        events.extend(self.close_current_block());
                        self.in_thinking = false;
                        self.text_scan_buffer = after;
                        continue;
                    }
                    None => {
                        let hold = partial_suffix_len(&self.text_scan_buffer, THINKING_CLOSE);
                        let emit_len = self.text_scan_buffer.len() - hold;
                        if emit_len > 0 {
                            let ready = self.text_scan_buffer[..emit_len].to_string();
                            events.extend(self.emit_thinking(&ready));
                            self.text_scan_buffer = self.text_scan_buffer[emit_len..].to_string();
                        }
                        break;
                    }
                }
            } else {
                match find_tag(&self.text_scan_buffer, THINKING_OPEN) {
                    Some((before, after)) => {
                        if !before.is_empty() {
                            events.extend(self.emit_text(&before));
                        }
                        events.extend(self.close_current_block());
                        self.in_thinking = true;
                        self.text_scan_buffer = after;
                        continue;
                    }
                    None => {
                        let hold = partial_suffix_len(&self.text_scan_buffer, THINKING_OPEN);
                        let emit_len = self.text_scan_buffer.len() - hold;
                        if emit_len > 0 {
                            let ready = self.text_scan_buffer[..emit_len].to_string();
                            events.extend(self.emit_text(&ready));
                            self.text_scan_buffer = self.text_scan_buffer[emit_len..].to_string();
                        }
                        break;
                    }
                }
            }
        }

        events
    }

    /// Emit a run of plain text, extracting any legacy `[Called NAME with
    /// args: {...}]` bracket tool calls first.
    fn emit_text(&mut self, text: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let mut cursor = 0;
        let re = legacy_tool_call_pattern();

        for m in re.find_iter(text) {
            if m.start() > cursor {
                events.extend(self.emit_text_delta(&text[cursor..m.start()]));
            }
            if let Some((name, args)) = parse_legacy_tool_call(&text[m.start()..m.end()]) {
                let key = (name.clone(), args.to_string());
                if self.legacy_tool_calls_seen.insert(key) {
                    events.extend(self.close_current_block());
                    let id = format!("toolu_{}", Uuid::new_v4().simple());
                    events.extend(self.open_block(
                        BlockKind::ToolUse,
                        ResponseContentBlock::ToolUse {
                            id: id.clone(),
                            name: name.clone(),
                            input: args.clone(),
                        },
                    ));
                    self.tool_uses.push(ToolUseAccumulator {
                        id,
                        name,
                        input_json: args.to_string(),
                    });
                    events.extend(self.close_current_block());
                }
            }
            cursor = m.end();
        }
        if cursor < text.len() {
            events.extend(self.emit_text_delta(&text[cursor..]));
        }
        events
    }

    fn emit_text_delta(&mut self, text: &str) -> Vec<StreamEvent> {
        if text.is_empty() {
            return Vec::new();
        }
        let mut events = self.open_block(BlockKind::Text, ResponseContentBlock::Text { text: String::new() });
        self.text.push_str(text);
        self.output_tokens += estimate_tokens(text);
        events.push(StreamEvent::ContentBlockDelta {
            index: self.next_index - 1,
            delta: ContentDelta::TextDelta { text: text.to_string() },
        });
        events
    }

    fn emit_thinking(&mut self, text: &str) -> Vec<StreamEvent> {
        if text.is_empty() {
            return Vec::new();
        }
        let mut events = self.open_block(
            BlockKind::Thinking,
            ResponseContentBlock::Thinking { thinking: String::new() },
        );
        self.thinking.get_or_insert_with(String::new).push_str(text);
        events.push(StreamEvent::ContentBlockDelta {
            index: self.next_index - 1,
            delta: ContentDelta::ThinkingDelta { thinking: text.to_string() },
        });
        events
    }

    fn process_tool_start(&mut self, payload: &serde_json::Value) -> Vec<StreamEvent> {
        let name = payload.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let tool_use_id = payload
            .get("toolUseId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("toolu_{}", Uuid::new_v4().simple()));
        let input = payload.get("input").map(|v| v.to_string()).unwrap_or_default();

        let mut events = self.close_current_block();
        events.extend(self.open_block(
            BlockKind::ToolUse,
            ResponseContentBlock::ToolUse {
                id: tool_use_id.clone(),
                name: name.clone(),
                input: serde_json::Value::Object(serde_json::Map::new()),
            },
        ));
        if !input.is_empty() {
            events.push(StreamEvent::ContentBlockDelta {
                index: self.next_index - 1,
                delta: ContentDelta::InputJsonDelta { partial_json: input.clone() },
            });
        }
        self.current_tool = Some(ToolUseAccumulator {
            id: tool_use_id,
            name,
            input_json: input,
        });
        events
    }

    fn process_tool_input(&mut self, input: &str) -> Vec<StreamEvent> {
        if self.current_block != Some(BlockKind::ToolUse) {
            return Vec::new();
        }
        if let Some(tool) = &mut self.current_tool {
            tool.input_json.push_str(input);
        }
        vec![StreamEvent::ContentBlockDelta {
            index: self.next_index - 1,
            delta: ContentDelta::InputJsonDelta { partial_json: input.to_string() },
        }]
    }

    fn process_tool_stop(&mut self) -> Vec<StreamEvent> {
        self.close_current_block()
    }

    fn reconstruct_usage_from_context_pct(&mut self, pct: f64) {
        let total_tokens = (CONTEXT_USAGE_FULL_TOKENS * pct / 100.0).round().max(0.0) as u32;
        self.input_tokens = total_tokens.saturating_sub(self.output_tokens);
    }

    /// Open a new block of `kind` at the next index, unless one of that
    /// kind is already open. Does not close a differently-kinded block -
    /// callers that need that must call [`close_current_block`] first.
    fn open_block(&mut self, kind: BlockKind, content_block: ResponseContentBlock) -> Vec<StreamEvent> {
        if self.current_block == Some(kind) {
            return Vec::new();
        }
        let index = self.next_index;
        self.next_index += 1;
        self.current_block = Some(kind);
        vec![StreamEvent::ContentBlockStart { index, content_block }]
    }

    fn close_current_block(&mut self) -> Vec<StreamEvent> {
        if self.current_block.is_none() {
            return Vec::new();
        }
        self.current_block = None;
        if let Some(tool) = self.current_tool.take() {
            self.tool_uses.push(tool);
        }
        vec![StreamEvent::ContentBlockStop { index: self.next_index - 1 }]
    }

    /// Build the initial `message_start` event.
    pub fn message_start_event(&self) -> StreamEvent {
        StreamEvent::MessageStart {
            message: PartialMessage {
                id: self.id.clone(),
                message_type: "message".to_string(),
                role: "assistant".to_string(),
                model: self.model.clone(),
                usage: Usage {
                    input_tokens: self.input_tokens,
                    output_tokens: 0,
                    cache_creation_input_tokens: None,
                    cache_read_input_tokens: None,
                },
            },
        }
    }

    /// Build the final `content_block_stop` (if a block is still open),
    /// `message_delta`, and `message_stop` events.
    pub fn finish_events(&mut self) -> Vec<StreamEvent> {
        let mut events = self.close_current_block();

        if self.was_message_delta_emitted {
            events.push(StreamEvent::MessageStop);
            return events;
        }
        self.was_message_delta_emitted = true;

        let stop_reason = if self.tool_uses.is_empty() {
            StopReason::EndTurn
        } else {
            StopReason::ToolUse
        };

        let usage = distribute_usage(self.input_tokens, self.output_tokens);

        events.push(StreamEvent::MessageDelta {
            delta: MessageDelta {
                stop_reason: Some(stop_reason),
                stop_sequence: None,
            },
            usage: Some(usage),
        });
        events.push(StreamEvent::MessageStop);
        events
    }

    /// Build a complete `MessagesResponse` from accumulated data.
    pub fn into_response(mut self) -> MessagesResponse {
        let _ = self.close_current_block();

        let mut content = Vec::new();

        if let Some(thinking) = &self.thinking {
            if !thinking.is_empty() {
                content.push(ResponseContentBlock::Thinking { thinking: thinking.clone() });
            }
        }
        if !self.text.is_empty() {
            content.push(ResponseContentBlock::Text { text: self.text.clone() });
        }
        for tool in &self.tool_uses {
            let input: serde_json::Value = serde_json::from_str(&tool.input_json)
                .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));
            content.push(ResponseContentBlock::ToolUse {
                id: tool.id.clone(),
                name: tool.name.clone(),
                input,
            });
        }

        let stop_reason = if self.tool_uses.is_empty() {
            StopReason::EndTurn
        } else {
            StopReason::ToolUse
        };

        MessagesResponse {
            id: self.id,
            response_type: "message".to_string(),
            role: "assistant".to_string(),
            content,
            model: self.model,
            stop_reason: Some(stop_reason),
            stop_sequence: None,
            usage: distribute_usage(self.input_tokens, self.output_tokens),
        }
    }
}

/// Distribute a reconstructed `input_tokens` total across
/// input/cache_creation/cache_read using the fixed 1:2:25 (of 28) ratio.
/// Skipped (everything attributed to `input`) below the minimum total.
fn distribute_usage(input_tokens: u32, output_tokens: u32) -> Usage {
    if input_tokens < USAGE_DISTRIBUTION_MIN_TOTAL {
        return Usage {
            input_tokens,
            output_tokens,
            cache_creation_input_tokens: None,
            cache_read_input_tokens: None,
        };
    }

    let total = input_tokens as u64;
    let parts = USAGE_DISTRIBUTION_PARTS as u64;
    let input = (total * 1 / parts) as u32;
    let cache_creation = (total * 2 / parts) as u32;
    let cache_read = (total - input as u64 - cache_creation as u64) as u32;

    Usage {
        input_tokens: input,
        output_tokens,
        cache_creation_input_tokens: Some(cache_creation),
        cache_read_input_tokens: Some(cache_read),
    }
}

/// Estimate tokens as a rough 4-chars-per-token heuristic (minimum 1).
///
/// Also used as the `/v1/messages/count_tokens` estimator and as the
/// client-side usage fallback when no `contextUsagePercentage` arrives.
pub fn estimate_tokens(text: &str) -> u32 {
    ((text.len() as f64 / 4.0).ceil() as u32).max(1)
}

/// Split `buf` on the first full occurrence of `tag`, or `None` if absent.
fn find_tag(buf: &str, tag: &str) -> Option<(String, String)> {
    buf.find(tag).map(|pos| {
        (buf[..pos].to_string(), buf[pos + tag.len()..].to_string())
    })
}

/// Length of the longest suffix of `buf` that is a (non-empty, strict)
/// prefix of `tag` - bytes that might be the start of a split tag and
/// should be held back rather than emitted as content.
fn partial_suffix_len(buf: &str, tag: &str) -> usize {
    let max = (tag.len() - 1).min(buf.len());
    for len in (1..=max).rev() {
        if buf.ends_with(&tag[..len]) {
            return len;
        }
    }
    0
}

fn legacy_tool_call_pattern() -> Regex {
    Regex::new(r"\[Called \w+ with args: \{[^\]]*\}\]").expect("valid legacy tool-call regex")
}

/// Parse a matched `[Called NAME with args: {...}]` span into (name, args).
fn parse_legacy_tool_call(span: &str) -> Option<(String, serde_json::Value)> {
    let inner = span.strip_prefix("[Called ")?.strip_suffix("]")?;
    let (name, rest) = inner.split_once(" with args: ")?;
    let args: serde_json::Value = serde_json::from_str(rest).ok()?;
    Some((name.to_string(), args))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_emits_text_delta() {
        let mut acc = ResponseAccumulator::new("claude-sonnet-4.5");
        let events = acc.process_payload(&serde_json::json!({"content": "hello"}));
        assert_eq!(events.len(), 2); // block_start + delta
        assert!(matches!(events[0], StreamEvent::ContentBlockStart { index: 0, .. }));
    }

    #[test]
    fn thinking_tag_split_across_chunks_is_buffered() {
        let mut acc = ResponseAccumulator::new("claude-sonnet-4.5");
        let e1 = acc.process_payload(&serde_json::json!({"content": "<think"}));
        assert!(e1.is_empty());
        let e2 = acc.process_payload(&serde_json::json!({"content": "ing>reasoning</thinking>answer"}));
        // thinking block open+delta, thinking close, text open+delta
        assert!(e2.iter().any(|e| matches!(e, StreamEvent::ContentBlockStop { .. })));
        let response = acc.into_response();
        assert_eq!(response.text(), "answer");
    }

    #[test]
    fn tool_use_closes_prior_text_block_before_opening() {
        let mut acc = ResponseAccumulator::new("claude-sonnet-4.5");
        acc.process_payload(&serde_json::json!({"content": "before"}));
        let events = acc.process_payload(&serde_json::json!({"name": "get_weather", "toolUseId": "t1", "input": {}}));
        assert!(matches!(events[0], StreamEvent::ContentBlockStop { index: 0 }));
        assert!(matches!(events[1], StreamEvent::ContentBlockStart { index: 1, .. }));
    }

    #[test]
    fn message_delta_emitted_exactly_once() {
        let mut acc = ResponseAccumulator::new("claude-sonnet-4.5");
        acc.process_payload(&serde_json::json!({"content": "hi"}));
        let first = acc.finish_events();
        assert_eq!(first.iter().filter(|e| matches!(e, StreamEvent::MessageDelta { .. })).count(), 1);
        let second = acc.finish_events();
        assert_eq!(second.iter().filter(|e| matches!(e, StreamEvent::MessageDelta { .. })).count(), 0);
    }

    #[test]
    fn context_usage_percentage_reconstructs_input_tokens() {
        let mut acc = ResponseAccumulator::new("claude-sonnet-4.5");
        acc.process_payload(&serde_json::json!({"content": "hi"}));
        acc.process_payload(&serde_json::json!({"contextUsagePercentage": 50.0}));
        assert!(acc.input_tokens > 0);
    }

    #[test]
    fn usage_distribution_skipped_below_minimum() {
        let usage = distribute_usage(50, 10);
        assert_eq!(usage.input_tokens, 50);
        assert!(usage.cache_creation_input_tokens.is_none());
    }

    #[test]
    fn usage_distribution_applies_1_2_25_ratio() {
        let usage = distribute_usage(280, 10);
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.cache_creation_input_tokens, Some(20));
        assert_eq!(usage.cache_read_input_tokens, Some(250));
    }

    #[test]
    fn legacy_bracket_tool_call_is_extracted_and_deduped() {
        let mut acc = ResponseAccumulator::new("claude-sonnet-4.5");
        let text = r#"[Called get_weather with args: {"city":"nyc"}] [Called get_weather with args: {"city":"nyc"}]"#;
        acc.process_payload(&serde_json::json!({"content": text}));
        let response = acc.into_response();
        assert_eq!(response.tool_uses().len(), 1);
    }

    #[test]
    fn estimate_tokens_rounds_up_with_minimum_one() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("ab"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
