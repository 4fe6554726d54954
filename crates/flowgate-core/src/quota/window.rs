//! Usage window boundaries and counter rollover.
//!
//! Daily windows end at the next UTC midnight; monthly windows end at 00:00
//! UTC on the first day of the next month. A counter is zeroed once `now`
//! reaches its stored boundary, and a fresh boundary is computed from `now`.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use flowgate_types::tier::{IdentityStatus, Tier, TierPolicy, UsageRecord};

/// The next UTC midnight strictly after `now`.
pub fn next_daily_reset(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc() + Duration::days(1)
}

/// 00:00 UTC on the first day of the month after `now`.
pub fn next_monthly_reset(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
        .unwrap_or_else(|| next_daily_reset(now) + Duration::days(30))
}

/// A fresh record for a newly registered identity.
pub fn new_usage_record(
    identity: &str,
    policy: &TierPolicy,
    premium_expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> UsageRecord {
    UsageRecord {
        identity: identity.to_string(),
        tier: policy.tier,
        status: IdentityStatus::Active,
        premium_expires_at: if policy.tier == Tier::Free {
            None
        } else {
            premium_expires_at
        },
        daily_used: 0,
        daily_reset_at: next_daily_reset(now),
        monthly_used: 0,
        monthly_reset_at: next_monthly_reset(now),
        limits: policy.limits(),
        created_at: now,
        updated_at: now,
    }
}

/// Zero any counter whose boundary has been crossed. Returns `true` if the
/// record changed.
///
/// Daily and monthly windows roll independently.
pub fn roll_windows(record: &mut UsageRecord, now: DateTime<Utc>) -> bool {
    let mut changed = false;

    if now >= record.daily_reset_at {
        record.daily_used = 0;
        record.daily_reset_at = next_daily_reset(now);
        changed = true;
    }

    if now >= record.monthly_reset_at {
        record.monthly_used = 0;
        record.monthly_reset_at = next_monthly_reset(now);
        changed = true;
    }

    if changed {
        record.updated_at = now;
    }
    changed
}

/// Charge one unit of usage: roll windows, then bump both counters.
pub fn increment_usage(record: &mut UsageRecord, now: DateTime<Utc>) {
    roll_windows(record, now);
    record.daily_used = record.daily_used.saturating_add(1);
    record.monthly_used = record.monthly_used.saturating_add(1);
    record.updated_at = now;
}
