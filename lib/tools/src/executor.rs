//! Tool execution.

use crate::call::ToolCall;
use crate::catalogue::{ToolDefinition, ToolName, catalogue};
use crate::error::{ToolError, error_payload};
use crate::handlers;
use async_trait::async_trait;
use beyond_ops_integration::{CrmConnector, TelephonyConnector};
use rootcause::Report;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Default commission rate applied to closed-won revenue.
pub const DEFAULT_COMMISSION_RATE: f64 = 0.05;

/// Runs tools by name on behalf of the model.
///
/// Implementations never fail: any problem is reported as an
/// `{"error": "..."}` value so one failing tool does not abort a turn.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Definitions offered to the model.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Runs one tool call.
    async fn run(&self, name: &str, args: JsonValue) -> JsonValue;
}

/// Tuning for report tools.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSettings {
    /// Fraction of closed-won revenue paid as commission.
    pub commission_rate: f64,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            commission_rate: DEFAULT_COMMISSION_RATE,
        }
    }
}

/// The production tool runner, backed by the CRM and telephony connectors.
#[derive(Clone)]
pub struct ToolExecutor {
    pub(crate) crm: Arc<dyn CrmConnector>,
    pub(crate) telephony: Arc<dyn TelephonyConnector>,
    pub(crate) settings: ToolSettings,
}

impl ToolExecutor {
    #[must_use]
    pub fn new(
        crm: Arc<dyn CrmConnector>,
        telephony: Arc<dyn TelephonyConnector>,
        settings: ToolSettings,
    ) -> Self {
        Self {
            crm,
            telephony,
            settings,
        }
    }

    /// Runs a parsed call.
    pub async fn execute(&self, call: ToolCall) -> Result<JsonValue, Report<ToolError>> {
        match call {
            ToolCall::GetLeads(input) => handlers::crm::leads(self, input).await,
            ToolCall::GetPipeline(input) => handlers::crm::pipeline(self, input).await,
            ToolCall::GetDashboardTotals(input) => {
                handlers::reports::dashboard_totals(self, input).await
            }
            ToolCall::GetEvents(input) => handlers::crm::events(self, input).await,
            ToolCall::GetEventDeals(input) => handlers::crm::event_deals(self, input).await,
            ToolCall::GetClients(input) => handlers::crm::clients(self, input).await,
            ToolCall::GetClientDetail(input) => handlers::crm::client_detail(self, input).await,
            ToolCall::GetFinanceSummary(input) => {
                handlers::reports::finance_summary(self, input).await
            }
            ToolCall::GetCallActivity(input) => handlers::calls::call_activity(self, input).await,
            ToolCall::GetAnalytics(input) => handlers::reports::analytics(self, input).await,
            ToolCall::GetTargets(input) => handlers::reports::targets(self, input).await,
            ToolCall::GetDailyRecap => handlers::reports::daily_recap(self).await,
            ToolCall::GetReps => handlers::crm::reps(self).await,
            ToolCall::UpdateLeadStatus(input) => {
                handlers::writes::update_lead_status(self, input).await
            }
            ToolCall::UpdateDealStage(input) => {
                handlers::writes::update_deal_stage(self, input).await
            }
            ToolCall::CreateNote(input) => handlers::writes::create_note(self, input).await,
        }
    }

    async fn run_checked(
        &self,
        name: &str,
        args: JsonValue,
    ) -> Result<JsonValue, Report<ToolError>> {
        let call = ToolCall::parse(name.parse::<ToolName>()?, args)?;
        let tool = call.name();
        if tool.is_write() {
            info!(tool = %tool, "running write tool");
        }
        self.execute(call).await
    }
}

#[async_trait]
impl ToolRunner for ToolExecutor {
    fn definitions(&self) -> Vec<ToolDefinition> {
        catalogue()
    }

    async fn run(&self, name: &str, args: JsonValue) -> JsonValue {
        let started = Instant::now();
        match self.run_checked(name, args).await {
            Ok(value) => {
                debug!(
                    tool = %name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "tool completed"
                );
                value
            }
            Err(report) => {
                let message = report.current_context().to_string();
                warn!(tool = %name, error = %message, "tool returned an error");
                error_payload(message)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording fakes for the connector traits.

    use async_trait::async_trait;
    use beyond_ops_integration::{
        Call, CallQuery, ConnectorError, CrmConnector, CrmRecord, TelephonyConnector,
        TelephonyUser,
    };
    use rootcause::Report;
    use serde_json::Value as JsonValue;
    use std::sync::Mutex;

    /// Answers queries by matching substrings of the SOQL text, first match
    /// wins. Unmatched queries return no records.
    #[derive(Default)]
    pub(crate) struct FakeCrm {
        pub responses: Vec<(&'static str, Vec<JsonValue>)>,
        pub fail_with: Option<ConnectorError>,
        pub queries: Mutex<Vec<String>>,
        pub updates: Mutex<Vec<(String, String, JsonValue)>>,
        pub creates: Mutex<Vec<(String, JsonValue)>>,
    }

    impl FakeCrm {
        pub(crate) fn respond(mut self, needle: &'static str, records: Vec<JsonValue>) -> Self {
            self.responses.push((needle, records));
            self
        }

        pub(crate) fn failing(error: ConnectorError) -> Self {
            Self {
                fail_with: Some(error),
                ..Self::default()
            }
        }

        pub(crate) fn queries(&self) -> Vec<String> {
            self.queries.lock().unwrap().clone()
        }

        fn check(&self) -> Result<(), Report<ConnectorError>> {
            match &self.fail_with {
                Some(error) => Err(error.clone().into()),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl CrmConnector for FakeCrm {
        async fn query(&self, soql: &str) -> Result<Vec<CrmRecord>, Report<ConnectorError>> {
            self.queries.lock().unwrap().push(soql.to_string());
            self.check()?;
            let records = self
                .responses
                .iter()
                .find(|(needle, _)| soql.contains(needle))
                .map(|(_, records)| records.clone())
                .unwrap_or_default();
            Ok(records
                .into_iter()
                .filter_map(|r| match r {
                    JsonValue::Object(map) => Some(map),
                    _ => None,
                })
                .collect())
        }

        async fn update_record(
            &self,
            object: &str,
            id: &str,
            fields: JsonValue,
        ) -> Result<(), Report<ConnectorError>> {
            self.check()?;
            self.updates
                .lock()
                .unwrap()
                .push((object.to_string(), id.to_string(), fields));
            Ok(())
        }

        async fn create_record(
            &self,
            object: &str,
            fields: JsonValue,
        ) -> Result<String, Report<ConnectorError>> {
            self.check()?;
            self.creates.lock().unwrap().push((object.to_string(), fields));
            Ok("0025g00000NewNote".to_string())
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeTelephony {
        pub calls: Vec<Call>,
        pub users: Vec<TelephonyUser>,
        pub fail_with: Option<ConnectorError>,
        pub queries: Mutex<Vec<CallQuery>>,
    }

    #[async_trait]
    impl TelephonyConnector for FakeTelephony {
        async fn list_calls(&self, query: &CallQuery) -> Result<Vec<Call>, Report<ConnectorError>> {
            self.queries.lock().unwrap().push(query.clone());
            if let Some(error) = &self.fail_with {
                return Err(error.clone().into());
            }
            Ok(self
                .calls
                .iter()
                .filter(|c| {
                    let rep = c.user.as_ref().map(|u| u.id);
                    query.user_id.is_none_or(|id| rep == Some(id))
                })
                .cloned()
                .collect())
        }

        async fn list_users(&self) -> Result<Vec<TelephonyUser>, Report<ConnectorError>> {
            if let Some(error) = &self.fail_with {
                return Err(error.clone().into());
            }
            Ok(self.users.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FakeCrm, FakeTelephony};
    use super::*;
    use beyond_ops_integration::ConnectorError;
    use serde_json::json;

    fn executor(crm: FakeCrm) -> (ToolExecutor, Arc<FakeCrm>) {
        let crm = Arc::new(crm);
        let telephony = Arc::new(FakeTelephony::default());
        let executor = ToolExecutor::new(crm.clone(), telephony, ToolSettings::default());
        (executor, crm)
    }

    #[tokio::test]
    async fn unknown_tool_becomes_error_payload() {
        let (executor, crm) = executor(FakeCrm::default());
        let result = executor.run("wipe_crm", json!({})).await;
        assert_eq!(result, json!({"error": "unknown tool: wipe_crm"}));
        assert!(crm.queries().is_empty());
    }

    #[tokio::test]
    async fn invalid_input_becomes_error_payload() {
        let (executor, crm) = executor(FakeCrm::default());
        let result = executor.run("update_deal_stage", json!({"stage": "Closed Won"})).await;
        let message = result["error"].as_str().expect("error payload");
        assert!(message.starts_with("invalid input for update_deal_stage"));
        assert!(crm.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn connector_failure_becomes_error_payload() {
        let (executor, _) = executor(FakeCrm::failing(ConnectorError::Api {
            provider: "salesforce".to_string(),
            status: 401,
            message: "INVALID_SESSION_ID: Session expired or invalid".to_string(),
        }));
        let result = executor.run("get_leads", json!({})).await;
        assert_eq!(
            result,
            json!({
                "error": "get_leads failed: salesforce returned 401: \
                          INVALID_SESSION_ID: Session expired or invalid"
            })
        );
    }

    #[test]
    fn offers_full_catalogue() {
        let (executor, _) = executor(FakeCrm::default());
        assert_eq!(executor.definitions().len(), 16);
    }
}
