//! Aggregated reports across CRM and telephony data.
//!
//! Reports that mix providers degrade per section: a telephony failure is
//! reported inside the result while the CRM figures are still returned.

use super::calls::{query_for, summarize};
use super::{failed, non_blank, partial_error, records_json};
use crate::catalogue::ToolName;
use crate::error::ToolError;
use crate::executor::ToolExecutor;
use crate::input::{AnalyticsInput, AnalyticsView, PeriodInput, TargetsInput};
use crate::query::Select;
use crate::records::{money, number, percent, sum, text};
use beyond_ops_integration::{CrmRecord, Period};
use chrono::Utc;
use rootcause::Report;
use serde_json::{Value as JsonValue, json};
use std::collections::BTreeMap;

/// First record of an aggregate query, or an empty one.
fn first(mut records: Vec<CrmRecord>) -> CrmRecord {
    if records.is_empty() {
        CrmRecord::new()
    } else {
        records.swap_remove(0)
    }
}

pub(crate) async fn dashboard_totals(
    ctx: &ToolExecutor,
    input: PeriodInput,
) -> Result<JsonValue, Report<ToolError>> {
    let tool = ToolName::GetDashboardTotals;
    let period = input.period.unwrap_or_default();
    let literal = period.soql_literal();

    let leads = Select::new("Lead", &["COUNT(Id) total"])
        .filter(format!("CreatedDate = {literal}"))
        .build();
    let open = Select::new("Opportunity", &["COUNT(Id) deals", "SUM(Amount) amount"])
        .filter("IsClosed = false")
        .build();
    let won = Select::new("Opportunity", &["COUNT(Id) deals", "SUM(Amount) amount"])
        .filter("IsWon = true")
        .filter(format!("CloseDate = {literal}"))
        .build();
    let calls_query = query_for(period, None);

    let (crm, calls) = futures::join!(
        async {
            futures::try_join!(
                ctx.crm.query(&leads),
                ctx.crm.query(&open),
                ctx.crm.query(&won),
            )
        },
        ctx.telephony.list_calls(&calls_query),
    );
    let (leads, open, won) = crm.map_err(failed(tool))?;
    let (leads, open, won) = (first(leads), first(open), first(won));

    let calls = match calls {
        Ok(calls) => {
            let summary = summarize(&calls);
            json!({
                "total": summary["total"],
                "answered": summary["answered"],
                "missed": summary["missed"],
            })
        }
        Err(report) => partial_error(&report),
    };

    Ok(json!({
        "period": period.as_str(),
        "newLeads": number(&leads, "total"),
        "openPipeline": {
            "deals": number(&open, "deals"),
            "amount": money(number(&open, "amount")),
        },
        "closedWon": {
            "deals": number(&won, "deals"),
            "amount": money(number(&won, "amount")),
        },
        "calls": calls,
    }))
}

/// Revenue, commission and forecast for a period.
pub(crate) async fn finance_summary(
    ctx: &ToolExecutor,
    input: PeriodInput,
) -> Result<JsonValue, Report<ToolError>> {
    let tool = ToolName::GetFinanceSummary;
    let period = input.period.unwrap_or_default();
    let literal = period.soql_literal();

    let won = Select::new(
        "Opportunity",
        &["Id", "Name", "Amount", "CloseDate", "Account.Name", "Owner.Name"],
    )
    .filter("IsWon = true")
    .filter(format!("CloseDate = {literal}"))
    .order_by("Amount DESC NULLS LAST")
    .limit(200)
    .build();
    let forecast = Select::new("Opportunity", &["SUM(Amount) amount", "COUNT(Id) deals"])
        .filter("IsClosed = false")
        .filter(format!("CloseDate = {literal}"))
        .build();

    let (won, forecast) = futures::try_join!(ctx.crm.query(&won), ctx.crm.query(&forecast))
        .map_err(failed(tool))?;
    let forecast = first(forecast);

    let revenue = sum(&won, "Amount");
    let average = if won.is_empty() { 0.0 } else { revenue / won.len() as f64 };

    let mut by_rep: BTreeMap<String, f64> = BTreeMap::new();
    for deal in &won {
        let owner = text(deal, "Owner.Name").unwrap_or("Unassigned").to_string();
        *by_rep.entry(owner).or_default() += number(deal, "Amount");
    }
    let mut by_rep: Vec<(String, f64)> = by_rep.into_iter().collect();
    by_rep.sort_by(|a, b| b.1.total_cmp(&a.1));

    let top_deals: Vec<CrmRecord> = won.iter().take(5).cloned().collect();

    Ok(json!({
        "period": period.as_str(),
        "revenue": money(revenue),
        "dealsWon": won.len(),
        "averageDealSize": money(average),
        "commissionRate": ctx.settings.commission_rate,
        "commission": money(revenue * ctx.settings.commission_rate),
        "revenueByRep": by_rep
            .into_iter()
            .map(|(name, amount)| json!({"name": name, "revenue": money(amount)}))
            .collect::<Vec<_>>(),
        "forecast": {
            "openDeals": number(&forecast, "deals"),
            "openAmount": money(number(&forecast, "amount")),
        },
        "topDeals": records_json(top_deals),
    }))
}

pub(crate) async fn analytics(
    ctx: &ToolExecutor,
    input: AnalyticsInput,
) -> Result<JsonValue, Report<ToolError>> {
    let tool = ToolName::GetAnalytics;
    let period = input.period.unwrap_or_default();
    let literal = period.soql_literal();

    let mut view = match input.view {
        AnalyticsView::LeadSources => {
            let soql = Select::new("Lead", &["LeadSource source", "COUNT(Id) total"])
                .filter(format!("CreatedDate = {literal}"))
                .group_by("LeadSource")
                .order_by("COUNT(Id) DESC")
                .build();
            let rows = ctx.crm.query(&soql).await.map_err(failed(tool))?;
            let total: f64 = sum(&rows, "total");
            let sources: Vec<JsonValue> = rows
                .iter()
                .map(|row| {
                    let count = number(row, "total");
                    json!({
                        "source": text(row, "source").unwrap_or("Unknown"),
                        "leads": count,
                        "share": percent(count, total),
                    })
                })
                .collect();
            json!({ "view": "lead_sources", "totalLeads": total, "sources": sources })
        }
        AnalyticsView::WinRate => {
            let fields = ["IsWon won", "COUNT(Id) total", "SUM(Amount) amount"];
            let soql = Select::new("Opportunity", &fields)
                .filter("IsClosed = true")
                .filter(format!("CloseDate = {literal}"))
                .group_by("IsWon")
                .build();
            let rows = ctx.crm.query(&soql).await.map_err(failed(tool))?;
            let row_for = |won: bool| {
                rows.iter()
                    .find(|r| r.get("won").and_then(JsonValue::as_bool) == Some(won))
            };
            let totals = |won: bool| {
                row_for(won).map_or((0.0, 0.0), |r| (number(r, "total"), number(r, "amount")))
            };
            let (won_count, won_amount) = totals(true);
            let (lost_count, lost_amount) = totals(false);
            json!({
                "view": "win_rate",
                "won": won_count,
                "lost": lost_count,
                "winRate": percent(won_count, won_count + lost_count),
                "wonAmount": money(won_amount),
                "lostAmount": money(lost_amount),
            })
        }
        AnalyticsView::StageBreakdown => {
            let fields = ["StageName stage", "COUNT(Id) total", "SUM(Amount) amount"];
            let soql = Select::new("Opportunity", &fields)
                .filter("IsClosed = false")
                .group_by("StageName")
                .build();
            let rows = ctx.crm.query(&soql).await.map_err(failed(tool))?;
            let stages: Vec<JsonValue> = rows
                .iter()
                .map(|row| {
                    json!({
                        "stage": text(row, "stage").unwrap_or("Unknown"),
                        "deals": number(row, "total"),
                        "amount": money(number(row, "amount")),
                    })
                })
                .collect();
            json!({ "view": "stage_breakdown", "stages": stages })
        }
        AnalyticsView::RepLeaderboard => {
            let fields = ["Owner.Name owner", "COUNT(Id) deals", "SUM(Amount) amount"];
            let soql = Select::new("Opportunity", &fields)
                .filter("IsWon = true")
                .filter(format!("CloseDate = {literal}"))
                .group_by("Owner.Name")
                .order_by("SUM(Amount) DESC")
                .build();
            let rows = ctx.crm.query(&soql).await.map_err(failed(tool))?;
            let reps: Vec<JsonValue> = rows
                .iter()
                .enumerate()
                .map(|(i, row)| {
                    json!({
                        "rank": i + 1,
                        "name": text(row, "owner").unwrap_or("Unassigned"),
                        "deals": number(row, "deals"),
                        "revenue": money(number(row, "amount")),
                    })
                })
                .collect();
            json!({ "view": "rep_leaderboard", "reps": reps })
        }
    };

    view["period"] = json!(period.as_str());
    Ok(view)
}

/// Per-rep targets against revenue won in the period.
pub(crate) async fn targets(
    ctx: &ToolExecutor,
    input: TargetsInput,
) -> Result<JsonValue, Report<ToolError>> {
    let tool = ToolName::GetTargets;
    let period = input.period.unwrap_or_default();

    let targets = Select::new("Sales_Target__c", &["Id", "Owner.Name", "Target_Amount__c"])
        .filter("Start_Date__c <= TODAY")
        .filter("End_Date__c >= TODAY")
        .build();
    let won_fields = ["Owner.Name owner", "SUM(Amount) amount", "COUNT(Id) deals"];
    let won = Select::new("Opportunity", &won_fields)
        .filter("IsWon = true")
        .filter(format!("CloseDate = {}", period.soql_literal()))
        .group_by("Owner.Name")
        .build();

    let (targets, won) = futures::try_join!(ctx.crm.query(&targets), ctx.crm.query(&won))
        .map_err(failed(tool))?;

    let owner_filter = non_blank(input.owner.as_deref()).map(str::to_lowercase);
    let rate = ctx.settings.commission_rate;

    let reps: Vec<JsonValue> = targets
        .iter()
        .filter_map(|target| {
            let name = text(target, "Owner.Name")?;
            if owner_filter
                .as_deref()
                .is_some_and(|f| !name.to_lowercase().contains(f))
            {
                return None;
            }
            let goal = number(target, "Target_Amount__c");
            let row = won.iter().find(|r| text(r, "owner") == Some(name));
            let achieved = row.map_or(0.0, |r| number(r, "amount"));
            Some(json!({
                "name": name,
                "target": money(goal),
                "achieved": money(achieved),
                "dealsWon": row.map_or(0.0, |r| number(r, "deals")),
                "attainment": percent(achieved, goal),
                "remaining": money((goal - achieved).max(0.0)),
                "commission": money(achieved * rate),
            }))
        })
        .collect();

    Ok(json!({
        "period": period.as_str(),
        "commissionRate": rate,
        "reps": reps,
    }))
}

/// Today's activity across leads, deals and calls.
pub(crate) async fn daily_recap(ctx: &ToolExecutor) -> Result<JsonValue, Report<ToolError>> {
    let tool = ToolName::GetDailyRecap;

    let leads = Select::new("Lead", &["Id", "Name", "Company", "LeadSource", "Owner.Name"])
        .filter("CreatedDate = TODAY")
        .order_by("CreatedDate DESC")
        .limit(50)
        .build();
    let won = Select::new("Opportunity", &["Id", "Name", "Amount", "Account.Name", "Owner.Name"])
        .filter("IsWon = true")
        .filter("CloseDate = TODAY")
        .limit(50)
        .build();
    let updated = Select::new("Opportunity", &["COUNT(Id) total"])
        .filter("IsClosed = false")
        .filter("LastModifiedDate = TODAY")
        .build();
    let calls_query = query_for(Period::Today, None);

    let (crm, calls) = futures::join!(
        async {
            futures::try_join!(
                ctx.crm.query(&leads),
                ctx.crm.query(&won),
                ctx.crm.query(&updated),
            )
        },
        ctx.telephony.list_calls(&calls_query),
    );
    let (leads, won, updated) = crm.map_err(failed(tool))?;

    let calls = match calls {
        Ok(calls) => summarize(&calls),
        Err(report) => partial_error(&report),
    };

    Ok(json!({
        "date": Utc::now().date_naive().to_string(),
        "newLeads": {
            "count": leads.len(),
            "leads": records_json(leads),
        },
        "dealsWon": {
            "count": won.len(),
            "amount": money(sum(&won, "Amount")),
            "deals": records_json(won),
        },
        "dealsUpdated": number(&first(updated), "total"),
        "calls": calls,
    }))
}
