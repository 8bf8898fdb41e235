//! CRM writes.
//!
//! These take effect in the CRM immediately and independently of whether
//! the surrounding chat turn is ever persisted.

use super::{failed, invalid, require_id, require_text};
use crate::catalogue::ToolName;
use crate::error::ToolError;
use crate::executor::ToolExecutor;
use crate::input::{CreateNoteInput, UpdateDealStageInput, UpdateLeadStatusInput};
use rootcause::Report;
use serde_json::{Value as JsonValue, json};
use tracing::info;

/// Salesforce caps note titles at 80 characters.
const MAX_NOTE_TITLE_CHARS: usize = 80;
const MAX_NOTE_BODY_CHARS: usize = 32_000;

pub(crate) async fn update_lead_status(
    ctx: &ToolExecutor,
    input: UpdateLeadStatusInput,
) -> Result<JsonValue, Report<ToolError>> {
    let tool = ToolName::UpdateLeadStatus;
    let lead_id = require_id(tool, "leadId", &input.lead_id)?;
    let status = require_text(tool, "status", &input.status)?;

    ctx.crm
        .update_record("Lead", lead_id, json!({ "Status": status }))
        .await
        .map_err(failed(tool))?;

    info!(lead_id, "lead status updated");
    Ok(json!({ "success": true, "leadId": lead_id, "status": status }))
}

pub(crate) async fn update_deal_stage(
    ctx: &ToolExecutor,
    input: UpdateDealStageInput,
) -> Result<JsonValue, Report<ToolError>> {
    let tool = ToolName::UpdateDealStage;
    let opportunity_id = require_id(tool, "opportunityId", &input.opportunity_id)?;
    let stage = require_text(tool, "stage", &input.stage)?;

    ctx.crm
        .update_record("Opportunity", opportunity_id, json!({ "StageName": stage }))
        .await
        .map_err(failed(tool))?;

    info!(opportunity_id, "deal stage updated");
    Ok(json!({ "success": true, "opportunityId": opportunity_id, "stage": stage }))
}

pub(crate) async fn create_note(
    ctx: &ToolExecutor,
    input: CreateNoteInput,
) -> Result<JsonValue, Report<ToolError>> {
    let tool = ToolName::CreateNote;
    let parent_id = require_id(tool, "parentId", &input.parent_id)?;
    let title = require_text(tool, "title", &input.title)?;
    let body = require_text(tool, "body", &input.body)?;

    if title.chars().count() > MAX_NOTE_TITLE_CHARS {
        let reason = format!("`title` is longer than {MAX_NOTE_TITLE_CHARS} characters");
        return Err(invalid(tool, reason));
    }
    if body.chars().count() > MAX_NOTE_BODY_CHARS {
        let reason = format!("`body` is longer than {MAX_NOTE_BODY_CHARS} characters");
        return Err(invalid(tool, reason));
    }

    let note_id = ctx
        .crm
        .create_record("Note", json!({ "ParentId": parent_id, "Title": title, "Body": body }))
        .await
        .map_err(failed(tool))?;

    info!(parent_id, note_id = %note_id, "note created");
    Ok(json!({ "success": true, "noteId": note_id, "parentId": parent_id }))
}

#[cfg(test)]
mod tests {
    use crate::executor::testing::{FakeCrm, FakeTelephony};
    use crate::executor::{ToolExecutor, ToolRunner, ToolSettings};
    use beyond_ops_integration::ConnectorError;
    use serde_json::json;
    use std::sync::Arc;

    fn executor(crm: FakeCrm) -> (ToolExecutor, Arc<FakeCrm>) {
        let crm = Arc::new(crm);
        let telephony = Arc::new(FakeTelephony::default());
        let executor = ToolExecutor::new(crm.clone(), telephony, ToolSettings::default());
        (executor, crm)
    }

    #[tokio::test]
    async fn updates_deal_stage() {
        let (executor, crm) = executor(FakeCrm::default());
        let result = executor
            .run(
                "update_deal_stage",
                json!({"opportunityId": "0065g00000AbCdE", "stage": " Closed Won "}),
            )
            .await;

        assert_eq!(
            result,
            json!({"success": true, "opportunityId": "0065g00000AbCdE", "stage": "Closed Won"})
        );
        let updates = crm.updates.lock().unwrap();
        assert_eq!(
            *updates,
            vec![(
                "Opportunity".to_string(),
                "0065g00000AbCdE".to_string(),
                json!({"StageName": "Closed Won"})
            )]
        );
    }

    #[tokio::test]
    async fn updates_lead_status() {
        let (executor, crm) = executor(FakeCrm::default());
        let result = executor
            .run("update_lead_status", json!({"leadId": "00Q5g00000AbCdE", "status": "Working"}))
            .await;
        assert_eq!(result["success"], true);
        assert_eq!(crm.updates.lock().unwrap()[0].2, json!({"Status": "Working"}));
    }

    #[tokio::test]
    async fn blank_stage_is_rejected_without_writing() {
        let (executor, crm) = executor(FakeCrm::default());
        let result = executor
            .run("update_deal_stage", json!({"opportunityId": "0065g00000AbCdE", "stage": "  "}))
            .await;
        assert!(result["error"].as_str().unwrap().contains("`stage` must not be empty"));
        assert!(crm.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn creates_note() {
        let (executor, crm) = executor(FakeCrm::default());
        let result = executor
            .run(
                "create_note",
                json!({
                    "parentId": "0015g00000AbCdE",
                    "title": "Call recap",
                    "body": "Wants 12 seats at Ascot."
                }),
            )
            .await;
        assert_eq!(result["noteId"], "0025g00000NewNote");
        let creates = crm.creates.lock().unwrap();
        assert_eq!(creates[0].0, "Note");
        assert_eq!(creates[0].1["Title"], "Call recap");
    }

    #[tokio::test]
    async fn long_note_title_is_rejected() {
        let (executor, crm) = executor(FakeCrm::default());
        let result = executor
            .run(
                "create_note",
                json!({"parentId": "0015g00000AbCdE", "title": "x".repeat(81), "body": "b"}),
            )
            .await;
        assert!(result["error"].as_str().unwrap().contains("longer than 80"));
        assert!(crm.creates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn crm_rejection_is_reported() {
        let (executor, _) = executor(FakeCrm::failing(ConnectorError::Api {
            provider: "salesforce".to_string(),
            status: 400,
            message: "INVALID_OR_NULL_FOR_RESTRICTED_PICKLIST: Stage: bad value".to_string(),
        }));
        let result = executor
            .run("update_deal_stage", json!({"opportunityId": "0065g00000AbCdE", "stage": "Maybe"}))
            .await;
        let error = result["error"].as_str().unwrap();
        assert!(error.contains("INVALID_OR_NULL_FOR_RESTRICTED_PICKLIST"));
    }
}
