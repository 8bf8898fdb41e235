//! Record listings straight from the CRM.

use super::{failed, invalid, non_blank, records_json, require_id};
use crate::catalogue::ToolName;
use crate::error::ToolError;
use crate::executor::ToolExecutor;
use crate::input::{
    ClientDetailInput, ClientsInput, EventDealsInput, EventsInput, LeadsInput, PipelineInput,
    clamp_limit,
};
use crate::query::Select;
use crate::records::{money, number, sum, text};
use beyond_ops_integration::CrmRecord;
use beyond_ops_integration::soql::{contains_pattern, quote};
use rootcause::Report;
use serde_json::{Value as JsonValue, json};
use std::collections::BTreeMap;

const OPPORTUNITY_FIELDS: &[&str] = &[
    "Id",
    "Name",
    "StageName",
    "Amount",
    "CloseDate",
    "Probability",
    "Account.Name",
    "Owner.Name",
];

pub(crate) async fn leads(
    ctx: &ToolExecutor,
    input: LeadsInput,
) -> Result<JsonValue, Report<ToolError>> {
    let tool = ToolName::GetLeads;
    let soql = Select::new(
        "Lead",
        &[
            "Id",
            "Name",
            "Company",
            "Email",
            "Phone",
            "Status",
            "LeadSource",
            "CreatedDate",
            "Owner.Name",
        ],
    )
    .filter("IsConverted = false")
    .filter_opt(non_blank(input.status.as_deref()).map(|s| format!("Status = {}", quote(s))))
    .filter_opt(non_blank(input.source.as_deref()).map(|s| format!("LeadSource = {}", quote(s))))
    .filter_opt(input.period.map(|p| format!("CreatedDate = {}", p.soql_literal())))
    .order_by("CreatedDate DESC")
    .limit(clamp_limit(input.limit))
    .build();

    let records = ctx.crm.query(&soql).await.map_err(failed(tool))?;
    Ok(json!({
        "count": records.len(),
        "leads": records_json(records),
    }))
}

/// Open opportunities with per-stage totals.
pub(crate) async fn pipeline(
    ctx: &ToolExecutor,
    input: PipelineInput,
) -> Result<JsonValue, Report<ToolError>> {
    let tool = ToolName::GetPipeline;
    let soql = Select::new("Opportunity", OPPORTUNITY_FIELDS)
        .filter("IsClosed = false")
        .filter_opt(input.period.map(|p| format!("CloseDate = {}", p.soql_literal())))
        .filter_opt(non_blank(input.stage.as_deref()).map(|s| format!("StageName = {}", quote(s))))
        .filter_opt(
            non_blank(input.owner.as_deref())
                .map(|o| format!("Owner.Name LIKE {}", contains_pattern(o))),
        )
        .order_by("CloseDate ASC")
        .limit(200)
        .build();

    let records = ctx.crm.query(&soql).await.map_err(failed(tool))?;

    let mut by_stage: BTreeMap<String, (usize, f64)> = BTreeMap::new();
    for record in &records {
        let stage = text(record, "StageName").unwrap_or("Unknown").to_string();
        let entry = by_stage.entry(stage).or_default();
        entry.0 += 1;
        entry.1 += number(record, "Amount");
    }
    let by_stage: Vec<JsonValue> = by_stage
        .into_iter()
        .map(|(stage, (count, amount))| {
            json!({"stage": stage, "count": count, "amount": money(amount)})
        })
        .collect();

    Ok(json!({
        "count": records.len(),
        "totalAmount": money(sum(&records, "Amount")),
        "byStage": by_stage,
        "deals": records_json(records),
    }))
}

pub(crate) async fn events(
    ctx: &ToolExecutor,
    input: EventsInput,
) -> Result<JsonValue, Report<ToolError>> {
    let tool = ToolName::GetEvents;
    let date_filter = match (input.upcoming_only.unwrap_or(false), input.period) {
        (true, _) => Some("Event_Date__c >= TODAY".to_string()),
        (false, Some(period)) => Some(format!("Event_Date__c = {}", period.soql_literal())),
        (false, None) => None,
    };
    let soql = Select::new(
        "Event__c",
        &["Id", "Name", "Event_Date__c", "Venue__c", "Capacity__c", "Packages_Sold__c"],
    )
    .filter_opt(date_filter)
    .order_by("Event_Date__c ASC")
    .limit(clamp_limit(input.limit))
    .build();

    let records = ctx.crm.query(&soql).await.map_err(failed(tool))?;
    let events: Vec<JsonValue> = records
        .into_iter()
        .map(|record| {
            let remaining = number(&record, "Capacity__c") - number(&record, "Packages_Sold__c");
            let mut value = JsonValue::Object(record);
            value["remainingCapacity"] = json!(remaining.max(0.0));
            value
        })
        .collect();

    Ok(json!({ "count": events.len(), "events": events }))
}

pub(crate) async fn event_deals(
    ctx: &ToolExecutor,
    input: EventDealsInput,
) -> Result<JsonValue, Report<ToolError>> {
    let tool = ToolName::GetEventDeals;
    let event_id = require_id(tool, "eventId", &input.event_id)?;
    let mut fields = OPPORTUNITY_FIELDS.to_vec();
    fields.extend(["IsWon", "IsClosed"]);
    let soql = Select::new("Opportunity", &fields)
        .filter(format!("Event__c = {}", quote(event_id)))
        .order_by("CloseDate DESC")
        .limit(200)
        .build();

    let records = ctx.crm.query(&soql).await.map_err(failed(tool))?;
    let flag = |record: &CrmRecord, name: &str| {
        record.get(name).and_then(JsonValue::as_bool).unwrap_or(false)
    };
    let won: Vec<&CrmRecord> = records.iter().filter(|r| flag(r, "IsWon")).collect();
    let open_amount: f64 = records
        .iter()
        .filter(|r| !flag(r, "IsClosed"))
        .map(|r| number(r, "Amount"))
        .sum();
    let won_amount: f64 = won.iter().map(|r| number(r, "Amount")).sum();
    let won_count = won.len();

    Ok(json!({
        "eventId": event_id,
        "count": records.len(),
        "wonAmount": money(won_amount),
        "wonCount": won_count,
        "openAmount": money(open_amount),
        "deals": records_json(records),
    }))
}

pub(crate) async fn clients(
    ctx: &ToolExecutor,
    input: ClientsInput,
) -> Result<JsonValue, Report<ToolError>> {
    let tool = ToolName::GetClients;
    let soql = Select::new(
        "Account",
        &["Id", "Name", "Industry", "Phone", "Website", "Owner.Name", "LastActivityDate"],
    )
    .filter_opt(
        non_blank(input.search.as_deref()).map(|s| format!("Name LIKE {}", contains_pattern(s))),
    )
    .order_by("LastActivityDate DESC NULLS LAST")
    .limit(clamp_limit(input.limit))
    .build();

    let records = ctx.crm.query(&soql).await.map_err(failed(tool))?;
    Ok(json!({ "count": records.len(), "clients": records_json(records) }))
}

/// One account with its contacts, deals and notes, fetched concurrently.
pub(crate) async fn client_detail(
    ctx: &ToolExecutor,
    input: ClientDetailInput,
) -> Result<JsonValue, Report<ToolError>> {
    let tool = ToolName::GetClientDetail;
    let account_id = quote(require_id(tool, "accountId", &input.account_id)?);

    let account = Select::new(
        "Account",
        &[
            "Id",
            "Name",
            "Industry",
            "Phone",
            "Website",
            "BillingCity",
            "Owner.Name",
            "LastActivityDate",
        ],
    )
    .filter(format!("Id = {account_id}"))
    .limit(1)
    .build();
    let contacts = Select::new("Contact", &["Id", "Name", "Title", "Email", "Phone"])
        .filter(format!("AccountId = {account_id}"))
        .order_by("Name ASC")
        .limit(100)
        .build();
    let deals = Select::new("Opportunity", OPPORTUNITY_FIELDS)
        .filter(format!("AccountId = {account_id}"))
        .order_by("CloseDate DESC")
        .limit(50)
        .build();
    let notes = Select::new("Note", &["Id", "Title", "Body", "CreatedDate", "Owner.Name"])
        .filter(format!("ParentId = {account_id}"))
        .order_by("CreatedDate DESC")
        .limit(20)
        .build();

    let (mut account, contacts, deals, notes) = futures::try_join!(
        ctx.crm.query(&account),
        ctx.crm.query(&contacts),
        ctx.crm.query(&deals),
        ctx.crm.query(&notes),
    )
    .map_err(failed(tool))?;

    let Some(account) = account.pop() else {
        return Err(invalid(tool, format!("no client with id {}", input.account_id.trim())));
    };

    Ok(json!({
        "account": account,
        "contacts": records_json(contacts),
        "opportunities": records_json(deals),
        "notes": records_json(notes),
    }))
}

/// Active reps from the CRM, joined with telephony availability by email.
pub(crate) async fn reps(ctx: &ToolExecutor) -> Result<JsonValue, Report<ToolError>> {
    let tool = ToolName::GetReps;
    let soql = Select::new("User", &["Id", "Name", "Email", "Title", "Phone"])
        .filter("IsActive = true")
        .filter("UserType = 'Standard'")
        .order_by("Name ASC")
        .limit(200)
        .build();

    let (users, phone_users) = futures::join!(ctx.crm.query(&soql), ctx.telephony.list_users());
    let users = users.map_err(failed(tool))?;

    let (phone_users, telephony_error) = match phone_users {
        Ok(list) => (list, None),
        Err(report) => (Vec::new(), Some(super::partial_error(&report))),
    };

    let reps: Vec<JsonValue> = users
        .into_iter()
        .map(|user| {
            let email = text(&user, "Email").map(str::to_lowercase);
            let phone = phone_users.iter().find(|p| {
                p.email
                    .as_deref()
                    .is_some_and(|e| Some(e.to_lowercase()) == email)
            });
            let mut value = JsonValue::Object(user);
            if let Some(phone) = phone {
                value["aircallUserId"] = json!(phone.id);
                value["available"] = json!(phone.available);
            }
            value
        })
        .collect();

    let mut result = json!({ "count": reps.len(), "reps": reps });
    if let Some(error) = telephony_error {
        result["telephony"] = error;
    }
    Ok(result)
}
