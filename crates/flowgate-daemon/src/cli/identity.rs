//! Identity administration commands.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use flowgate_core::quota::AccessDecision;
use flowgate_core::quota::gate::get_next_reset_time;
use flowgate_types::tier::{IdentityStatus, Tier, UsageRecord};

use crate::cli::IdentityCommand;
use crate::state::AppState;

pub async fn handle(state: &AppState, command: IdentityCommand, json: bool) -> Result<()> {
    match command {
        IdentityCommand::Register {
            identity,
            tier,
            expires,
        } => register(state, &identity, &tier, expires.as_deref(), json).await,
        IdentityCommand::Suspend { identity } => {
            set_status(state, &identity, IdentityStatus::Suspended, json).await
        }
        IdentityCommand::Activate { identity } => {
            set_status(state, &identity, IdentityStatus::Active, json).await
        }
        IdentityCommand::Show { identity } => show(state, &identity, json).await,
        IdentityCommand::Check { identity, key } => check(state, &identity, &key, json).await,
        IdentityCommand::List => list(state, json).await,
    }
}

async fn register(
    state: &AppState,
    identity: &str,
    tier: &str,
    expires: Option<&str>,
    json: bool,
) -> Result<()> {
    let tier: Tier = tier.parse().map_err(anyhow::Error::msg)?;
    let expires_at = expires.map(parse_expiry).transpose()?;
    if tier.expires() && expires_at.is_none() {
        tracing::warn!(identity, tier = %tier, "registering expiring tier without an expiry");
    }

    let record = state
        .gate
        .register_identity(identity, tier, expires_at)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        println!(
            "  {} Registered {} at tier {}",
            style("✓").green(),
            style(identity).cyan(),
            style(record.tier).bold()
        );
    }
    Ok(())
}

async fn set_status(
    state: &AppState,
    identity: &str,
    status: IdentityStatus,
    json: bool,
) -> Result<()> {
    let record = state.gate.set_status(identity, status).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        println!(
            "  {} {} is now {}",
            style("✓").green(),
            style(identity).cyan(),
            style(record.status).bold()
        );
    }
    Ok(())
}

async fn show(state: &AppState, identity: &str, json: bool) -> Result<()> {
    let Some(record) = state.gate.get_user_tier(identity).await? else {
        bail!("identity '{identity}' is not registered");
    };
    let next_reset = get_next_reset_time(&record);

    if json {
        let view = serde_json::json!({
            "record": record,
            "next_reset_at": next_reset,
        });
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!();
    println!("  {}", style(&record.identity).cyan().bold());
    println!("  Tier:     {}", record.tier);
    println!("  Status:   {}", status_label(record.status));
    if let Some(expires_at) = record.premium_expires_at {
        let label = if record.is_expired_at(Utc::now()) {
            style("expired").red().to_string()
        } else {
            style("active").green().to_string()
        };
        println!("  Expires:  {} ({label})", expires_at.to_rfc3339());
    }
    println!(
        "  Daily:    {}/{} (resets {})",
        record.daily_used,
        record.limits.daily_limit,
        record.daily_reset_at.to_rfc3339()
    );
    println!(
        "  Monthly:  {}/{} (resets {})",
        record.monthly_used,
        record.limits.monthly_limit,
        record.monthly_reset_at.to_rfc3339()
    );
    println!("  Tools:    {}", entitlement_label(&record));
    println!("  Next reset: {}", next_reset.to_rfc3339());
    println!();
    Ok(())
}

async fn check(state: &AppState, identity: &str, key: &str, json: bool) -> Result<()> {
    let decision = state.gate.check_access(identity, key).await?;

    if json {
        let view = match &decision {
            AccessDecision::Allow => serde_json::json!({ "allowed": true }),
            AccessDecision::Deny(denial) => serde_json::json!({
                "allowed": false,
                "code": denial.reason.code(),
                "denial": denial,
            }),
        };
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    match decision {
        AccessDecision::Allow => println!(
            "  {} {} may run '{}'",
            style("✓").green(),
            style(identity).cyan(),
            key
        ),
        AccessDecision::Deny(denial) => {
            println!("  {} {}", style("✗").red(), denial);
            if let (Some(used), Some(limit)) = (denial.details.used, denial.details.limit) {
                println!("    used {used} of {limit}");
            }
            if let Some(resets_at) = denial.details.resets_at {
                println!("    resets at {}", resets_at.to_rfc3339());
            }
            if let Some(tier) = denial.details.suggested_tier {
                println!("    upgrade to {}", style(tier).bold());
            }
        }
    }
    Ok(())
}

async fn list(state: &AppState, json: bool) -> Result<()> {
    let mut records = Vec::new();
    for identity in state.gate.identities().await? {
        if let Some(record) = state.gate.get_user_tier(&identity).await? {
            records.push(record);
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("  {}", style("No identities registered.").dim());
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Identity").fg(Color::White),
        Cell::new("Tier").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Daily").fg(Color::White),
        Cell::new("Monthly").fg(Color::White),
    ]);
    for record in &records {
        let status = match record.status {
            IdentityStatus::Active => Cell::new("● active").fg(Color::Green),
            IdentityStatus::Suspended => Cell::new("○ suspended").fg(Color::Yellow),
            IdentityStatus::Archived => Cell::new("◌ archived").fg(Color::DarkGrey),
        };
        table.add_row(vec![
            Cell::new(&record.identity).fg(Color::Cyan),
            Cell::new(record.tier),
            status,
            Cell::new(format!("{}/{}", record.daily_used, record.limits.daily_limit)),
            Cell::new(format!(
                "{}/{}",
                record.monthly_used, record.limits.monthly_limit
            )),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn parse_expiry(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid expiry '{value}', expected RFC 3339"))
}

fn status_label(status: IdentityStatus) -> String {
    match status {
        IdentityStatus::Active => style("active").green().to_string(),
        IdentityStatus::Suspended => style("suspended").yellow().to_string(),
        IdentityStatus::Archived => style("archived").dim().to_string(),
    }
}

fn entitlement_label(record: &UsageRecord) -> String {
    let entitlements = &record.limits.entitlements;
    if entitlements.contains("*") {
        "all".to_string()
    } else {
        entitlements.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}
