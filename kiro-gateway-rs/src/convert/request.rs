//! Convert Anthropic MessagesRequest to Kiro API payload.
//!
//! The build is a fixed pipeline of ordered rewrites (hallucination drop,
//! adjacent-role merge, system/thinking prefix integration, unfulfilled
//! tool_use filtering, history alternation repair, image retention window,
//! tool sanitization) rather than a single pass, because several rules
//! depend on the output of the one before it (e.g. the image retention
//! window is computed over the post-merge message list, not the raw one).

use std::collections::HashSet;

use uuid::Uuid;

use crate::config::{
    API_ORIGIN, DEFAULT_THINKING_BUDGET, IMAGE_RETENTION_WINDOW, MAX_THINKING_BUDGET,
    MAX_TOOL_DESCRIPTION_LENGTH, MAX_TOOL_NAME_LENGTH, MIN_THINKING_BUDGET,
};
use crate::convert::content;
use crate::convert::schema::sanitize_json_schema;
use crate::error::{Error, Result};
use crate::models::kiro::{InputSchema, KiroToolSpec, ToolSpecification};
use crate::models::request::{ContentBlock, Message, MessageContent, MessagesRequest, Role, SystemPrompt, Tool};

/// Convert a `MessagesRequest` into a Kiro API JSON payload.
pub fn build_kiro_payload(
    request: &MessagesRequest,
    model_id: &str,
    profile_arn: Option<&str>,
) -> Result<serde_json::Value> {
    if request.messages.is_empty() {
        return Err(Error::EmptyMessages);
    }

    tracing::debug!(
        requested_model = %request.model,
        resolved_model = %model_id,
        "resolved model mapping"
    );

    let mut messages: Vec<Message> = request
        .messages
        .iter()
        .map(|m| Message {
            role: if m.role == Role::System { Role::User } else { m.role },
            content: m.content.clone(),
        })
        .collect();

    drop_trailing_hallucinated_assistant(&mut messages); // rule 4
    let mut messages = merge_adjacent_roles(messages); // rule 3

    if messages.is_empty() {
        return Err(Error::EmptyMessages);
    }

    // rule 1: system prompt integration. Prepending to the first message's
    // text has the same effect whether that message ends up as history[0]
    // (len > 1, no duplication into currentMessage) or as currentMessage
    // itself (len == 1, merged directly, no history entry at all).
    let system_text = build_base_system_text(request.system.as_ref());
    let system_text = apply_thinking_prefix(system_text, request); // rule 2
    if let Some(sys) = &system_text {
        if messages[0].role == Role::User {
            prepend_text(&mut messages[0].content, &format!("{}\n\n", sys));
        }
    }

    filter_unfulfilled_tool_uses(&mut messages, request.tools.as_deref()); // rule 6

    // Ensure currentMessage is always a user turn.
    if messages.last().is_some_and(|m| m.role != Role::User) {
        messages.push(Message {
            role: Role::User,
            content: MessageContent::Text("Continue".to_string()),
        });
    }

    let total = messages.len();
    let (history_msgs, current_msg) = messages.split_at(total - 1);
    let current = &current_msg[0];

    // rule 5: history ends with assistant.
    let mut history: Vec<serde_json::Value> = history_msgs
        .iter()
        .enumerate()
        .map(|(idx, msg)| {
            let position_from_end = total - 1 - idx;
            let retain_images = position_from_end <= IMAGE_RETENTION_WINDOW; // rule 8
            content::message_to_history_entry(msg, model_id, retain_images)
        })
        .collect();

    if history_msgs.last().is_some_and(|m| m.role == Role::User) {
        history.push(serde_json::json!({
            "assistantResponseMessage": { "content": "Continue" }
        }));
    }

    // Build current message.
    let current_text = content::extract_text(&current.content);
    let current_images = content::extract_images(&current.content); // rule 11 (position 0, always retained)
    let current_tool_results = content::extract_tool_results(&current.content);

    let mut current_message = serde_json::json!({
        "userInputMessage": {
            "content": current_text,
            "modelId": model_id,
            "origin": API_ORIGIN,
        }
    });

    if !current_images.is_empty() {
        current_message["userInputMessage"]["images"] =
            serde_json::to_value(&current_images).unwrap_or_default();
    }

    let mut context = serde_json::Map::new();

    if let Some(tools) = &request.tools {
        let kiro_tools = convert_tools(tools); // rule 9
        if !kiro_tools.is_empty() {
            context.insert(
                "tools".to_string(),
                serde_json::to_value(&kiro_tools).unwrap_or_default(),
            );
        }
    }

    if !current_tool_results.is_empty() {
        context.insert(
            "toolResults".to_string(),
            serde_json::to_value(&current_tool_results).unwrap_or_default(),
        );
    }

    if !context.is_empty() {
        current_message["userInputMessage"]["userInputMessageContext"] =
            serde_json::Value::Object(context);
    }

    // rule 12: current-message content floor.
    if current_text.is_empty() {
        let floor = if !current_tool_results.is_empty() {
            "Tool results provided."
        } else {
            "Continue"
        };
        current_message["userInputMessage"]["content"] = serde_json::Value::String(floor.to_string());
    }

    let conversation_id = Uuid::new_v4().to_string();
    let mut payload = serde_json::json!({
        "conversationState": {
            "chatTriggerType": "MANUAL",
            "conversationId": conversation_id,
            "currentMessage": current_message,
        }
    });

    if !history.is_empty() {
        payload["conversationState"]["history"] = serde_json::Value::Array(history);
    }

    if let Some(arn) = profile_arn {
        payload["profileArn"] = serde_json::Value::String(arn.to_string());
    }

    Ok(payload)
}

/// rule 4: drop a trailing assistant message whose content is exactly a
/// single text block containing `"{"` - upstream's hallucinated-prefix tell.
fn drop_trailing_hallucinated_assistant(messages: &mut Vec<Message>) {
    let is_hallucinated = matches!(
        messages.last(),
        Some(Message { role: Role::Assistant, content }) if is_bare_open_brace(content)
    );
    if is_hallucinated {
        messages.pop();
    }
}

fn is_bare_open_brace(content: &MessageContent) -> bool {
    match content {
        MessageContent::Text(t) => t == "{",
        MessageContent::Blocks(blocks) => {
            matches!(blocks.as_slice(), [ContentBlock::Text { text }] if text == "{")
        }
    }
}

/// rule 3: merge consecutive same-role messages, concatenating text with
/// `\n` and extending non-text blocks, preserving tool_use ordering.
fn merge_adjacent_roles(messages: Vec<Message>) -> Vec<Message> {
    let mut result: Vec<Message> = Vec::with_capacity(messages.len());
    for msg in messages {
        if let Some(last) = result.last_mut() {
            if last.role == msg.role {
                last.content = merge_content(&last.content, &msg.content);
                continue;
            }
        }
        result.push(msg);
    }
    result
}

fn merge_content(existing: &MessageContent, new: &MessageContent) -> MessageContent {
    let mut blocks: Vec<ContentBlock> = match existing {
        MessageContent::Text(t) => vec![ContentBlock::Text { text: t.clone() }],
        MessageContent::Blocks(b) => b.clone(),
    };

    match new {
        MessageContent::Text(t) => {
            if let Some(ContentBlock::Text { text }) = blocks.last_mut() {
                text.push('\n');
                text.push_str(t);
            } else {
                blocks.push(ContentBlock::Text { text: t.clone() });
            }
        }
        MessageContent::Blocks(b) => blocks.extend(b.iter().cloned()),
    }

    MessageContent::Blocks(blocks)
}

/// rule 1 (base text) - just the explicit system prompt, no thinking prefix yet.
fn build_base_system_text(system: Option<&SystemPrompt>) -> Option<String> {
    system.map(|s| s.text()).filter(|t| !t.is_empty())
}

/// rule 2: thinking prefix, clamped and prepended to the system prompt,
/// creating one if absent.
fn apply_thinking_prefix(system_text: Option<String>, request: &MessagesRequest) -> Option<String> {
    let thinking = request.thinking.as_ref()?;
    if thinking.thinking_type != "enabled" {
        return system_text;
    }

    let budget = thinking
        .budget_tokens
        .unwrap_or(DEFAULT_THINKING_BUDGET)
        .clamp(MIN_THINKING_BUDGET, MAX_THINKING_BUDGET);
    let prefix = format!(
        "<thinking_mode>enabled</thinking_mode><max_thinking_length>{}</max_thinking_length>",
        budget
    );

    Some(match system_text {
        Some(existing) => format!("{}\n\n{}", prefix, existing),
        None => prefix,
    })
}

fn prepend_text(content: &mut MessageContent, prefix: &str) {
    match content {
        MessageContent::Text(t) => {
            *t = format!("{}{}", prefix, t);
        }
        MessageContent::Blocks(blocks) => {
            if let Some(ContentBlock::Text { text }) =
                blocks.iter_mut().find(|b| matches!(b, ContentBlock::Text { .. }))
            {
                *text = format!("{}{}", prefix, text);
            } else {
                blocks.insert(0, ContentBlock::Text { text: prefix.to_string() });
            }
        }
    }
}

/// rule 6: drop an assistant `tool_use` whose `input` is empty when the
/// tool's declared schema has a non-empty `required` array, along with any
/// `tool_result` elsewhere in the conversation referring to its id.
fn filter_unfulfilled_tool_uses(messages: &mut [Message], tools: Option<&[Tool]>) {
    let tools = match tools {
        Some(t) if !t.is_empty() => t,
        _ => return,
    };

    let mut dropped_ids: HashSet<String> = HashSet::new();

    for msg in messages.iter_mut() {
        if msg.role != Role::Assistant {
            continue;
        }
        if let MessageContent::Blocks(blocks) = &mut msg.content {
            blocks.retain(|b| match b {
                ContentBlock::ToolUse { id, name, input } => {
                    let empty_input = matches!(input, serde_json::Value::Object(m) if m.is_empty())
                        || input.is_null();
                    if empty_input && tool_requires_input(tools, name) {
                        dropped_ids.insert(id.clone());
                        false
                    } else {
                        true
                    }
                }
                _ => true,
            });
        }
    }

    if dropped_ids.is_empty() {
        return;
    }

    for msg in messages.iter_mut() {
        if let MessageContent::Blocks(blocks) = &mut msg.content {
            blocks.retain(|b| match b {
                ContentBlock::ToolResult { tool_use_id, .. } => !dropped_ids.contains(tool_use_id),
                _ => true,
            });
        }
    }
}

fn tool_requires_input(tools: &[Tool], name: &str) -> bool {
    tools
        .iter()
        .find(|t| t.name == name)
        .map(|t| {
            t.input_schema
                .get("required")
                .and_then(|r| r.as_array())
                .is_some_and(|arr| !arr.is_empty())
        })
        .unwrap_or(false)
}

/// rule 9: drop web-search tools, truncate long descriptions, sanitize schemas.
fn convert_tools(tools: &[Tool]) -> Vec<KiroToolSpec> {
    tools
        .iter()
        .filter(|tool| {
            let lowered = tool.name.to_lowercase();
            lowered != "web_search" && lowered != "websearch"
        })
        .map(|tool| {
            let name = if tool.name.len() > MAX_TOOL_NAME_LENGTH {
                tool.name.chars().take(MAX_TOOL_NAME_LENGTH).collect()
            } else {
                tool.name.clone()
            };

            let description = tool.description.clone().unwrap_or_default();
            let description = if description.chars().count() > MAX_TOOL_DESCRIPTION_LENGTH {
                description.chars().take(MAX_TOOL_DESCRIPTION_LENGTH).collect()
            } else {
                description
            };

            let schema = sanitize_json_schema(&tool.input_schema);

            KiroToolSpec {
                tool_specification: ToolSpecification {
                    name,
                    description,
                    input_schema: InputSchema { json: schema },
                },
            }
        })
        .collect()
}
