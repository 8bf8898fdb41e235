//! Parsed tool calls.

use crate::catalogue::ToolName;
use crate::error::ToolError;
use crate::input::{
    AnalyticsInput, CallActivityInput, ClientDetailInput, ClientsInput, CreateNoteInput,
    EventDealsInput, EventsInput, LeadsInput, PeriodInput, PipelineInput, TargetsInput,
    UpdateDealStageInput, UpdateLeadStatusInput,
};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

/// A tool together with its validated input.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    GetLeads(LeadsInput),
    GetPipeline(PipelineInput),
    GetDashboardTotals(PeriodInput),
    GetEvents(EventsInput),
    GetEventDeals(EventDealsInput),
    GetClients(ClientsInput),
    GetClientDetail(ClientDetailInput),
    GetFinanceSummary(PeriodInput),
    GetCallActivity(CallActivityInput),
    GetAnalytics(AnalyticsInput),
    GetTargets(TargetsInput),
    GetDailyRecap,
    GetReps,
    UpdateLeadStatus(UpdateLeadStatusInput),
    UpdateDealStage(UpdateDealStageInput),
    CreateNote(CreateNoteInput),
}

impl ToolCall {
    /// Parses model-supplied arguments for `name`. A `null` argument value is
    /// treated as an empty object.
    pub fn parse(name: ToolName, args: JsonValue) -> Result<Self, ToolError> {
        let args = match args {
            JsonValue::Null => JsonValue::Object(Default::default()),
            other => other,
        };

        Ok(match name {
            ToolName::GetLeads => Self::GetLeads(decode(name, args)?),
            ToolName::GetPipeline => Self::GetPipeline(decode(name, args)?),
            ToolName::GetDashboardTotals => Self::GetDashboardTotals(decode(name, args)?),
            ToolName::GetEvents => Self::GetEvents(decode(name, args)?),
            ToolName::GetEventDeals => Self::GetEventDeals(decode(name, args)?),
            ToolName::GetClients => Self::GetClients(decode(name, args)?),
            ToolName::GetClientDetail => Self::GetClientDetail(decode(name, args)?),
            ToolName::GetFinanceSummary => Self::GetFinanceSummary(decode(name, args)?),
            ToolName::GetCallActivity => Self::GetCallActivity(decode(name, args)?),
            ToolName::GetAnalytics => Self::GetAnalytics(decode(name, args)?),
            ToolName::GetTargets => Self::GetTargets(decode(name, args)?),
            ToolName::GetDailyRecap => Self::GetDailyRecap,
            ToolName::GetReps => Self::GetReps,
            ToolName::UpdateLeadStatus => Self::UpdateLeadStatus(decode(name, args)?),
            ToolName::UpdateDealStage => Self::UpdateDealStage(decode(name, args)?),
            ToolName::CreateNote => Self::CreateNote(decode(name, args)?),
        })
    }

    /// The tool this call targets.
    #[must_use]
    pub fn name(&self) -> ToolName {
        match self {
            Self::GetLeads(_) => ToolName::GetLeads,
            Self::GetPipeline(_) => ToolName::GetPipeline,
            Self::GetDashboardTotals(_) => ToolName::GetDashboardTotals,
            Self::GetEvents(_) => ToolName::GetEvents,
            Self::GetEventDeals(_) => ToolName::GetEventDeals,
            Self::GetClients(_) => ToolName::GetClients,
            Self::GetClientDetail(_) => ToolName::GetClientDetail,
            Self::GetFinanceSummary(_) => ToolName::GetFinanceSummary,
            Self::GetCallActivity(_) => ToolName::GetCallActivity,
            Self::GetAnalytics(_) => ToolName::GetAnalytics,
            Self::GetTargets(_) => ToolName::GetTargets,
            Self::GetDailyRecap => ToolName::GetDailyRecap,
            Self::GetReps => ToolName::GetReps,
            Self::UpdateLeadStatus(_) => ToolName::UpdateLeadStatus,
            Self::UpdateDealStage(_) => ToolName::UpdateDealStage,
            Self::CreateNote(_) => ToolName::CreateNote,
        }
    }
}

fn decode<T: DeserializeOwned>(name: ToolName, args: JsonValue) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidInput {
        tool: name.to_string(),
        reason: e.to_string(),
    })
}
