//! Markdown transcript export.

use crate::conversation::Conversation;
use crate::message::ChatMessage;
use std::borrow::Cow;
use std::fmt::Write;

/// Renders a conversation as a Markdown transcript.
///
/// Layout: the title as a level-one heading, a short header (date, message
/// count), then one level-two heading per message carrying the role and
/// timestamp, followed by the body and any tool calls. Body lines that
/// Markdown would read as headings are escaped, so the role headings are
/// the only level-two headings in the output.
#[must_use]
pub fn to_markdown(conversation: &Conversation) -> String {
    let meta = &conversation.meta;
    let mut out = String::new();

    // Writing into a String cannot fail.
    let title = meta.title.split_whitespace().collect::<Vec<_>>().join(" ");
    let _ = writeln!(out, "# {title}");
    let _ = writeln!(out);
    let _ = writeln!(out, "- **Date:** {}", meta.created_at.format("%Y-%m-%d %H:%M UTC"));
    let _ = writeln!(out, "- **Messages:** {}", conversation.messages.len());

    for message in &conversation.messages {
        let _ = writeln!(out);
        let _ = writeln!(out, "---");
        let _ = writeln!(out);
        write_message(&mut out, message);
    }

    out
}

fn write_message(out: &mut String, message: &ChatMessage) {
    let _ = writeln!(
        out,
        "## {} ({})",
        message.role.label(),
        message.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let _ = writeln!(out);

    let body = message.content.trim();
    if !body.is_empty() {
        for line in body.lines() {
            let _ = writeln!(out, "{}", escape_line(line));
        }
    }

    let invocations = message.tool_invocations();
    if !invocations.is_empty() {
        let _ = writeln!(out);
        for invocation in invocations {
            let _ = writeln!(out, "> Tool call: `{}`", invocation.tool_name);
        }
    }
}

/// Escapes ATX heading markers and setext underlines.
fn escape_line(line: &str) -> Cow<'_, str> {
    let trimmed = line.trim_start();
    let setext = !trimmed.is_empty()
        && (trimmed.trim_end().chars().all(|c| c == '-')
            || trimmed.trim_end().chars().all(|c| c == '='));
    if trimmed.starts_with('#') || setext {
        let indent = line.len() - trimmed.len();
        Cow::Owned(format!("{}\\{}", &line[..indent], trimmed))
    } else {
        Cow::Borrowed(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ConversationMeta;
    use crate::message::ToolInvocation;
    use beyond_ops_core::ConversationId;
    use chrono::Utc;
    use serde_json::json;

    fn conversation(messages: Vec<ChatMessage>) -> Conversation {
        let now = Utc::now();
        Conversation {
            meta: ConversationMeta {
                id: ConversationId::new(),
                title: "Pipeline check-in".to_string(),
                user_email: "rep@beyond.example".to_string(),
                created_at: now,
                updated_at: now,
                message_count: messages.len() as u64,
            },
            messages,
        }
    }

    fn role_headings(markdown: &str) -> Vec<&str> {
        markdown.lines().filter(|l| l.starts_with("## ")).collect()
    }

    #[test]
    fn one_heading_per_message_in_order() {
        let markdown = to_markdown(&conversation(vec![
            ChatMessage::user("How many leads today?"),
            ChatMessage::assistant("Four new leads."),
            ChatMessage::user("Thanks"),
        ]));

        let headings = role_headings(&markdown);
        assert_eq!(headings.len(), 3);
        assert!(headings[0].starts_with("## User"));
        assert!(headings[1].starts_with("## Assistant"));
        assert!(headings[2].starts_with("## User"));
        assert!(markdown.starts_with("# Pipeline check-in\n"));
        assert!(markdown.contains("- **Messages:** 3"));
    }

    #[test]
    fn lists_tool_calls() {
        let markdown = to_markdown(&conversation(vec![
            ChatMessage::assistant("Updated.").with_tool_invocation(ToolInvocation::completed(
                "call_1",
                "update_deal_stage",
                json!({"opportunityId": "006"}),
                json!({"success": true}),
            )),
        ]));
        assert!(markdown.contains("> Tool call: `update_deal_stage`"));
    }

    #[test]
    fn heading_lines_in_bodies_are_escaped() {
        let markdown = to_markdown(&conversation(vec![
            ChatMessage::user("Summarise this:\n## Q3 numbers\nrevenue up"),
            ChatMessage::assistant("# Summary\nAll good\n---\n  ### Detail"),
        ]));

        assert_eq!(role_headings(&markdown).len(), 2);
        assert!(markdown.contains("\\## Q3 numbers"));
        assert!(markdown.contains("\\# Summary"));
        assert!(markdown.contains("\\---"));
        assert!(markdown.contains("  \\### Detail"));
        assert!(markdown.contains("revenue up"));
    }

    #[test]
    fn title_stays_on_one_line() {
        let mut conversation = conversation(Vec::new());
        conversation.meta.title = "Q4\n## injected".to_string();
        let markdown = to_markdown(&conversation);
        assert!(markdown.starts_with("# Q4 ## injected\n"));
        assert!(role_headings(&markdown).is_empty());
    }

    #[test]
    fn empty_conversation_has_no_role_headings() {
        let markdown = to_markdown(&conversation(Vec::new()));
        assert!(role_headings(&markdown).is_empty());
        assert!(markdown.contains("- **Messages:** 0"));
    }
}
