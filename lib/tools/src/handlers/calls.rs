//! Call activity from the telephony provider.

use super::failed;
use crate::catalogue::ToolName;
use crate::error::ToolError;
use crate::executor::ToolExecutor;
use crate::input::CallActivityInput;
use beyond_ops_integration::{Call, CallDirection, CallQuery, Period};
use chrono::Utc;
use rootcause::Report;
use serde_json::{Value as JsonValue, json};
use std::collections::HashMap;

#[derive(Debug, Default)]
struct Tally {
    calls: u64,
    answered: u64,
    talk_seconds: u64,
}

/// Aggregate statistics over a list of calls.
pub(crate) fn summarize(calls: &[Call]) -> JsonValue {
    let inbound = calls.iter().filter(|c| c.direction == CallDirection::Inbound).count();
    let answered: Vec<&Call> = calls.iter().filter(|c| c.is_answered()).collect();
    let missed = calls
        .iter()
        .filter(|c| c.direction == CallDirection::Inbound && !c.is_answered())
        .count();
    let talk_seconds: u64 = answered.iter().map(|c| c.duration).sum();
    let average = if answered.is_empty() {
        0
    } else {
        talk_seconds / answered.len() as u64
    };

    let mut by_rep: HashMap<String, Tally> = HashMap::new();
    for call in calls {
        let name = call
            .user
            .as_ref()
            .map(|u| u.name.clone())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "Unassigned".to_string());
        let tally = by_rep.entry(name).or_default();
        tally.calls += 1;
        if call.is_answered() {
            tally.answered += 1;
            tally.talk_seconds += call.duration;
        }
    }
    let mut by_rep: Vec<(String, Tally)> = by_rep.into_iter().collect();
    by_rep.sort_by(|a, b| b.1.calls.cmp(&a.1.calls).then_with(|| a.0.cmp(&b.0)));

    json!({
        "total": calls.len(),
        "inbound": inbound,
        "outbound": calls.len() - inbound,
        "answered": answered.len(),
        "missed": missed,
        "talkTimeSeconds": talk_seconds,
        "averageCallSeconds": average,
        "byRep": by_rep
            .into_iter()
            .map(|(name, t)| json!({
                "name": name,
                "calls": t.calls,
                "answered": t.answered,
                "talkTimeSeconds": t.talk_seconds,
            }))
            .collect::<Vec<_>>(),
    })
}

/// Builds the telephony query for a reporting period ending now.
pub(crate) fn query_for(period: Period, user_id: Option<u64>) -> CallQuery {
    let now = Utc::now();
    let (from, end) = period.range(now);
    CallQuery {
        from,
        to: end.min(now),
        user_id,
    }
}

pub(crate) async fn call_activity(
    ctx: &ToolExecutor,
    input: CallActivityInput,
) -> Result<JsonValue, Report<ToolError>> {
    let tool = ToolName::GetCallActivity;
    let period = input.period.unwrap_or(Period::ThisWeek);
    let query = query_for(period, input.user_id);

    let calls = ctx
        .telephony
        .list_calls(&query)
        .await
        .map_err(failed(tool))?;

    let mut result = summarize(&calls);
    result["period"] = json!(period.as_str());
    Ok(result)
}
