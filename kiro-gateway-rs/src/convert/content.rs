//! Content block conversion between Anthropic and Kiro formats.

use std::collections::HashSet;

use crate::models::kiro::{
    KiroImage, KiroImageSource, KiroTextContent, KiroToolResult, KiroToolUse,
};
use crate::models::request::{ContentBlock, ImageSource, Message, MessageContent, Role};

/// Extract plain text from a message's content.
pub fn extract_text(content: &MessageContent) -> String {
    content.text()
}

/// Extract images from a message's content blocks.
pub fn extract_images(content: &MessageContent) -> Vec<KiroImage> {
    match content {
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Image { source } => Some(image_to_kiro(source)),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Count of image blocks in a message's content, without converting them.
pub fn count_images(content: &MessageContent) -> usize {
    match content {
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .filter(|b| matches!(b, ContentBlock::Image { .. }))
            .count(),
        _ => 0,
    }
}

/// Convert an Anthropic image source to Kiro format: `{format, source: {bytes}}`
/// where `format` is the subtype half of the media type (`image/png` -> `png`).
fn image_to_kiro(source: &ImageSource) -> KiroImage {
    let format = source
        .media_type
        .split('/')
        .nth(1)
        .unwrap_or("jpeg")
        .to_string();

    KiroImage {
        format,
        source: KiroImageSource {
            bytes: source.data.clone(),
        },
    }
}

/// Extract tool use blocks from a message.
pub fn extract_tool_uses(content: &MessageContent) -> Vec<KiroToolUse> {
    match content {
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => Some(KiroToolUse {
                    name: name.clone(),
                    input: input.clone(),
                    tool_use_id: id.clone(),
                }),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Extract tool result blocks from a message, keeping only the first
/// `tool_result` seen for a given `tool_use_id`.
pub fn extract_tool_results(content: &MessageContent) -> Vec<KiroToolResult> {
    let mut seen = HashSet::new();
    match content {
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => {
                    if !seen.insert(tool_use_id.clone()) {
                        return None;
                    }
                    let text = content.text();
                    let status = if *is_error { "error" } else { "success" };
                    Some(KiroToolResult {
                        content: vec![KiroTextContent { text }],
                        status: status.to_string(),
                        tool_use_id: tool_use_id.clone(),
                    })
                }
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Extract thinking text from message content.
pub fn extract_thinking(content: &MessageContent) -> Option<String> {
    match content {
        MessageContent::Blocks(blocks) => {
            let thinking: Vec<&str> = blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Thinking { thinking } => Some(thinking.as_str()),
                    _ => None,
                })
                .collect();
            if thinking.is_empty() {
                None
            } else {
                Some(thinking.join("\n"))
            }
        }
        _ => None,
    }
}

/// Convert a message to a Kiro history entry.
///
/// `retain_images` gates whether inline image bytes are kept or replaced
/// with the placeholder text `[此消息包含 N 张图片，已在历史记录中省略]`;
/// the image retention window is a property of the message's position
/// within the conversation, decided by the caller.
pub fn message_to_history_entry(
    msg: &Message,
    model_id: &str,
    retain_images: bool,
) -> serde_json::Value {
    match msg.role {
        Role::User => {
            let mut text = extract_text(&msg.content);
            let image_count = count_images(&msg.content);
            let images = if retain_images {
                extract_images(&msg.content)
            } else {
                Vec::new()
            };
            let tool_results = extract_tool_results(&msg.content);

            if !retain_images && image_count > 0 {
                let placeholder = format!("[此消息包含 {} 张图片，已在历史记录中省略]", image_count);
                text = if text.is_empty() {
                    placeholder
                } else {
                    format!("{}\n{}", text, placeholder)
                };
            }

            let mut entry = serde_json::json!({
                "userInputMessage": {
                    "content": text,
                    "modelId": model_id,
                    "origin": crate::config::API_ORIGIN,
                }
            });

            if !images.is_empty() {
                entry["userInputMessage"]["images"] =
                    serde_json::to_value(&images).unwrap_or_default();
            }

            if !tool_results.is_empty() {
                entry["userInputMessage"]["userInputMessageContext"] = serde_json::json!({
                    "toolResults": serde_json::to_value(&tool_results).unwrap_or_default()
                });
            }

            entry
        }
        Role::Assistant => {
            let text = extract_text(&msg.content);
            let tool_uses = extract_tool_uses(&msg.content);
            let thinking = extract_thinking(&msg.content);

            // Wrap thinking in XML tags if present
            let content = if let Some(thinking_text) = thinking {
                format!(
                    "<antThinking>\n{}\n</antThinking>\n{}",
                    thinking_text, text
                )
            } else {
                text
            };

            let mut entry = serde_json::json!({
                "assistantResponseMessage": {
                    "content": content,
                }
            });

            if !tool_uses.is_empty() {
                entry["assistantResponseMessage"]["toolUses"] =
                    serde_json::to_value(&tool_uses).unwrap_or_default();
            }

            entry
        }
        Role::System => {
            // System messages get folded into the user message as a prefix
            // upstream of this function; this arm only triggers for a stray
            // system message that survived merging.
            let text = extract_text(&msg.content);
            serde_json::json!({
                "userInputMessage": {
                    "content": text,
                    "modelId": model_id,
                    "origin": crate::config::API_ORIGIN,
                }
            })
        }
    }
}
