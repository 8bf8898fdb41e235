//! Conversion of stored chat history into model messages.

use crate::backend::{ContentBlock, ModelMessage, ModelRole};
use beyond_ops_conversation::{ChatMessage, MessageRole, ToolInvocationState};
use beyond_ops_tools::is_error_payload;

/// Converts client or stored messages into the model's turn structure.
///
/// Completed tool invocations on an assistant message become a tool-use
/// turn followed by a tool-result turn, then the assistant's text. Calls
/// that never produced a result are dropped. Consecutive turns with the
/// same role are merged and leading assistant turns are skipped, since the
/// model expects alternating turns that open with the user.
#[must_use]
pub fn to_model_messages(history: &[ChatMessage]) -> Vec<ModelMessage> {
    let mut turns: Vec<ModelMessage> = Vec::new();

    for message in history {
        match message.role {
            MessageRole::User => {
                if !message.content.trim().is_empty() {
                    push(&mut turns, ModelRole::User, vec![ContentBlock::text(&message.content)]);
                }
            }
            MessageRole::Assistant => {
                let completed: Vec<_> = message
                    .tool_invocations()
                    .iter()
                    .filter(|inv| inv.state == ToolInvocationState::Result)
                    .filter_map(|inv| inv.result.as_ref().map(|result| (inv, result)))
                    .collect();

                if !completed.is_empty() {
                    let uses = completed
                        .iter()
                        .map(|(inv, _)| ContentBlock::ToolUse {
                            id: inv.tool_call_id.clone(),
                            name: inv.tool_name.clone(),
                            input: inv.args.clone(),
                        })
                        .collect();
                    let results = completed
                        .iter()
                        .map(|(inv, result)| ContentBlock::ToolResult {
                            tool_use_id: inv.tool_call_id.clone(),
                            content: result.to_string(),
                            is_error: is_error_payload(result),
                        })
                        .collect();
                    push(&mut turns, ModelRole::Assistant, uses);
                    push(&mut turns, ModelRole::User, results);
                }
                if !message.content.trim().is_empty() {
                    let text = vec![ContentBlock::text(&message.content)];
                    push(&mut turns, ModelRole::Assistant, text);
                }
            }
        }
    }

    let first_user = turns
        .iter()
        .position(|t| t.role == ModelRole::User)
        .unwrap_or(turns.len());
    turns.split_off(first_user)
}

fn push(turns: &mut Vec<ModelMessage>, role: ModelRole, content: Vec<ContentBlock>) {
    match turns.last_mut() {
        Some(last) if last.role == role => last.content.extend(content),
        _ => turns.push(ModelMessage { role, content }),
    }
}
