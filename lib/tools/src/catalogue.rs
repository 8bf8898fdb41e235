//! The tool catalogue.
//!
//! Every tool the model may call is a variant of [`ToolName`]; adding one
//! means adding a variant, and every `match` over the catalogue must then
//! account for it.

use crate::error::ToolError;
use beyond_ops_integration::Period;
use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use std::fmt;
use std::str::FromStr;

/// Names of all tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    GetLeads,
    GetPipeline,
    GetDashboardTotals,
    GetEvents,
    GetEventDeals,
    GetClients,
    GetClientDetail,
    GetFinanceSummary,
    GetCallActivity,
    GetAnalytics,
    GetTargets,
    GetDailyRecap,
    GetReps,
    UpdateLeadStatus,
    UpdateDealStage,
    CreateNote,
}

/// What the model is told about a tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: JsonValue,
}

impl ToolName {
    pub const ALL: [ToolName; 16] = [
        Self::GetLeads,
        Self::GetPipeline,
        Self::GetDashboardTotals,
        Self::GetEvents,
        Self::GetEventDeals,
        Self::GetClients,
        Self::GetClientDetail,
        Self::GetFinanceSummary,
        Self::GetCallActivity,
        Self::GetAnalytics,
        Self::GetTargets,
        Self::GetDailyRecap,
        Self::GetReps,
        Self::UpdateLeadStatus,
        Self::UpdateDealStage,
        Self::CreateNote,
    ];

    /// The wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetLeads => "get_leads",
            Self::GetPipeline => "get_pipeline",
            Self::GetDashboardTotals => "get_dashboard_totals",
            Self::GetEvents => "get_events",
            Self::GetEventDeals => "get_event_deals",
            Self::GetClients => "get_clients",
            Self::GetClientDetail => "get_client_detail",
            Self::GetFinanceSummary => "get_finance_summary",
            Self::GetCallActivity => "get_call_activity",
            Self::GetAnalytics => "get_analytics",
            Self::GetTargets => "get_targets",
            Self::GetDailyRecap => "get_daily_recap",
            Self::GetReps => "get_reps",
            Self::UpdateLeadStatus => "update_lead_status",
            Self::UpdateDealStage => "update_deal_stage",
            Self::CreateNote => "create_note",
        }
    }

    /// Returns true for tools that change CRM data.
    #[must_use]
    pub fn is_write(&self) -> bool {
        match self {
            Self::UpdateLeadStatus | Self::UpdateDealStage | Self::CreateNote => true,
            Self::GetLeads
            | Self::GetPipeline
            | Self::GetDashboardTotals
            | Self::GetEvents
            | Self::GetEventDeals
            | Self::GetClients
            | Self::GetClientDetail
            | Self::GetFinanceSummary
            | Self::GetCallActivity
            | Self::GetAnalytics
            | Self::GetTargets
            | Self::GetDailyRecap
            | Self::GetReps => false,
        }
    }

    /// Natural-language description the model uses to pick tools.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::GetLeads => {
                "List recent leads from Salesforce, newest first. Filter by status, lead source or \
                 the period the lead was created in."
            }
            Self::GetPipeline => {
                "Show open opportunities (the sales pipeline) with totals per stage. Filter by \
                 expected close period, stage or owner name."
            }
            Self::GetDashboardTotals => {
                "Headline numbers for a period: new leads, open pipeline, closed-won revenue and \
                 call volume."
            }
            Self::GetEvents => {
                "List hospitality events with dates, venues and capacity. Use upcomingOnly for \
                 events from today onwards."
            }
            Self::GetEventDeals => {
                "List the opportunities (package sales) linked to one event, with won and open \
                 totals. Needs the event id from get_events."
            }
            Self::GetClients => "Search client accounts by name, most recently active first.",
            Self::GetClientDetail => {
                "Full profile of one client account: details, contacts, opportunities and recent \
                 notes. Needs the account id from get_clients."
            }
            Self::GetFinanceSummary => {
                "Revenue for a period: closed-won total, deal count, average deal size, \
                 commission, revenue by rep and open pipeline forecast."
            }
            Self::GetCallActivity => {
                "Call statistics from Aircall for a period: inbound, outbound, answered, missed, \
                 talk time and a per-rep breakdown."
            }
            Self::GetAnalytics => {
                "Analytics views: lead_sources (leads by source), win_rate (won vs lost), \
                 stage_breakdown (open pipeline by stage) or rep_leaderboard (won revenue by rep)."
            }
            Self::GetTargets => {
                "Sales targets per rep with revenue won against target, attainment percentage and \
                 commission earned."
            }
            Self::GetDailyRecap => {
                "Today's recap: new leads, deals won, deals updated and calls made."
            }
            Self::GetReps => "Directory of active sales reps with email and phone availability.",
            Self::UpdateLeadStatus => {
                "Change the status of a lead in Salesforce. Only use when the user explicitly asks \
                 to update a lead."
            }
            Self::UpdateDealStage => {
                "Move an opportunity to a new stage in Salesforce. Only use when the user \
                 explicitly asks to update a deal."
            }
            Self::CreateNote => {
                "Attach a note to a Salesforce record (lead, contact, account or opportunity). \
                 Only use when the user asks to log a note."
            }
        }
    }

    /// JSON schema of the tool's input.
    #[must_use]
    pub fn input_schema(&self) -> JsonValue {
        let periods: Vec<&str> = Period::ALL.iter().map(Period::as_str).collect();
        let period = json!({
            "type": "string",
            "enum": periods,
            "description": "Reporting period"
        });
        let limit = json!({
            "type": "integer",
            "minimum": 1,
            "maximum": 200,
            "description": "Maximum number of records (default 25)"
        });

        match self {
            Self::GetLeads => object(
                json!({
                    "status": {
                        "type": "string",
                        "description": "Lead status, e.g. Open - Not Contacted"
                    },
                    "source": {"type": "string", "description": "Lead source, e.g. Web"},
                    "period": period,
                    "limit": limit
                }),
                &[],
            ),
            Self::GetPipeline => object(
                json!({
                    "period": period,
                    "stage": {"type": "string", "description": "Opportunity stage name"},
                    "owner": {"type": "string", "description": "Part of the owner's name"}
                }),
                &[],
            ),
            Self::GetDashboardTotals | Self::GetFinanceSummary => {
                object(json!({ "period": period }), &[])
            }
            Self::GetEvents => object(
                json!({
                    "period": period,
                    "upcomingOnly": {
                        "type": "boolean",
                        "description": "Only events from today onwards"
                    },
                    "limit": limit
                }),
                &[],
            ),
            Self::GetEventDeals => object(
                json!({
                    "eventId": {"type": "string", "description": "Salesforce id of the event"}
                }),
                &["eventId"],
            ),
            Self::GetClients => object(
                json!({
                    "search": {"type": "string", "description": "Part of the account name"},
                    "limit": limit
                }),
                &[],
            ),
            Self::GetClientDetail => object(
                json!({ "accountId": {"type": "string", "description": "Salesforce account id"} }),
                &["accountId"],
            ),
            Self::GetCallActivity => object(
                json!({
                    "period": period,
                    "userId": {"type": "integer", "description": "Aircall user id from get_reps"}
                }),
                &[],
            ),
            Self::GetAnalytics => object(
                json!({
                    "view": {
                        "type": "string",
                        "enum": ["lead_sources", "win_rate", "stage_breakdown", "rep_leaderboard"]
                    },
                    "period": period
                }),
                &["view"],
            ),
            Self::GetTargets => object(
                json!({
                    "period": period,
                    "owner": {"type": "string", "description": "Part of the rep's name"}
                }),
                &[],
            ),
            Self::GetDailyRecap | Self::GetReps => object(json!({}), &[]),
            Self::UpdateLeadStatus => object(
                json!({
                    "leadId": {"type": "string", "description": "Salesforce lead id"},
                    "status": {"type": "string", "description": "New lead status"}
                }),
                &["leadId", "status"],
            ),
            Self::UpdateDealStage => object(
                json!({
                    "opportunityId": {"type": "string", "description": "Salesforce opportunity id"},
                    "stage": {"type": "string", "description": "New stage name"}
                }),
                &["opportunityId", "stage"],
            ),
            Self::CreateNote => object(
                json!({
                    "parentId": {
                        "type": "string",
                        "description": "Id of the record the note belongs to"
                    },
                    "title": {"type": "string", "maxLength": 80},
                    "body": {"type": "string"}
                }),
                &["parentId", "title", "body"],
            ),
        }
    }

    /// The full definition handed to the model.
    #[must_use]
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.as_str(),
            description: self.description(),
            input_schema: self.input_schema(),
        }
    }
}

fn object(properties: JsonValue, required: &[&str]) -> JsonValue {
    json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tool| tool.as_str() == s)
            .ok_or_else(|| ToolError::UnknownTool {
                name: s.to_string(),
            })
    }
}

/// Definitions for every tool, in catalogue order.
#[must_use]
pub fn catalogue() -> Vec<ToolDefinition> {
    ToolName::ALL.iter().map(ToolName::definition).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn sixteen_unique_names_round_trip() {
        let names: HashSet<_> = ToolName::ALL.iter().map(ToolName::as_str).collect();
        assert_eq!(names.len(), 16);
        for tool in ToolName::ALL {
            assert_eq!(tool.as_str().parse::<ToolName>().unwrap(), tool);
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        assert_eq!(
            "drop_all_leads".parse::<ToolName>(),
            Err(ToolError::UnknownTool {
                name: "drop_all_leads".to_string()
            })
        );
    }

    #[test]
    fn exactly_three_write_tools() {
        let writes: Vec<_> = ToolName::ALL
            .iter()
            .filter(|t| t.is_write())
            .map(ToolName::as_str)
            .collect();
        assert_eq!(writes, vec!["update_lead_status", "update_deal_stage", "create_note"]);
    }

    #[test]
    fn schemas_are_objects_with_required_list() {
        for definition in catalogue() {
            assert_eq!(definition.input_schema["type"], "object", "{}", definition.name);
            assert!(definition.input_schema["required"].is_array());
            assert!(!definition.description.is_empty());
        }
        let schema = ToolName::UpdateDealStage.input_schema();
        assert_eq!(schema["required"], json!(["opportunityId", "stage"]));
    }
}
