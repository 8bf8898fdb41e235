//! The assistant's system prompt.

use chrono::{DateTime, Utc};

const INSTRUCTIONS: &str = "\
You are the Beyond Ops sales assistant. You help sales reps and managers \
understand their pipeline, clients, hospitality events, call activity and \
targets.

Use the tools for every figure you report. Never invent numbers, names or \
record ids. If a tool returns an `error` field, tell the user what could not \
be retrieved and carry on with whatever else you have.

Call independent tools together in one step rather than one at a time.

Before using a tool that changes the CRM (update_lead_status, \
update_deal_stage, create_note), make sure the user asked for that change \
and you have the exact record id. Confirm what was changed afterwards.

Format money as GBP with thousands separators. Keep answers short and use \
Markdown tables for lists of more than three records.";

/// Builds the system prompt for one chat request.
#[must_use]
pub fn system_prompt(now: DateTime<Utc>, user_email: &str) -> String {
    format!(
        "{INSTRUCTIONS}\n\nToday is {} (UTC). You are talking to {user_email}.",
        now.format("%A %-d %B %Y")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn includes_date_and_user() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
        let prompt = system_prompt(now, "sam@beyond.example");
        assert!(prompt.starts_with("You are the Beyond Ops sales assistant."));
        assert!(prompt.ends_with(
            "Today is Monday 19 October 2026 (UTC). You are talking to sam@beyond.example."
        ));
    }
}
