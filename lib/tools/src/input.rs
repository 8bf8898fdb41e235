//! Typed tool inputs.
//!
//! Field names follow the JSON schemas in the catalogue (camelCase). Unknown
//! fields are ignored; missing required fields fail deserialization.

use beyond_ops_integration::Period;
use serde::Deserialize;

pub const DEFAULT_LIMIT: u32 = 25;
pub const MAX_LIMIT: u32 = 200;

/// Clamps an optional record limit into `1..=MAX_LIMIT`.
#[must_use]
pub fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadsInput {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub period: Option<Period>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineInput {
    #[serde(default)]
    pub period: Option<Period>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
}

/// Input for tools that only take a reporting period.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodInput {
    #[serde(default)]
    pub period: Option<Period>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsInput {
    #[serde(default)]
    pub period: Option<Period>,
    #[serde(default)]
    pub upcoming_only: Option<bool>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDealsInput {
    pub event_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientsInput {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientDetailInput {
    pub account_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallActivityInput {
    #[serde(default)]
    pub period: Option<Period>,
    #[serde(default)]
    pub user_id: Option<u64>,
}

/// Analytics views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsView {
    LeadSources,
    WinRate,
    StageBreakdown,
    RepLeaderboard,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsInput {
    pub view: AnalyticsView,
    #[serde(default)]
    pub period: Option<Period>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetsInput {
    #[serde(default)]
    pub period: Option<Period>,
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLeadStatusInput {
    pub lead_id: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDealStageInput {
    pub opportunity_id: String,
    pub stage: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNoteInput {
    pub parent_id: String,
    pub title: String,
    pub body: String,
}
