//! Tier, status, and per-identity usage types.
//!
//! A `UsageRecord` is the durable state the access gate consults: the
//! identity's tier and status, its rolling daily/monthly counters with their
//! reset boundaries, and the limits derived from its tier at registration.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Entitlement wildcard: grants every action and tool.
pub const ALL_TOOLS: &str = "*";

// ---------------------------------------------------------------------------
// Tier
// ---------------------------------------------------------------------------

/// An entitlement class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Premium,
    Enterprise,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Premium => "premium",
            Tier::Enterprise => "enterprise",
        }
    }

    /// Whether this tier carries an expiry timestamp that must be honored.
    pub fn expires(&self) -> bool {
        matches!(self, Tier::Premium | Tier::Enterprise)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Tier::Free),
            "premium" => Ok(Tier::Premium),
            "enterprise" => Ok(Tier::Enterprise),
            other => Err(format!("invalid tier: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// IdentityStatus
// ---------------------------------------------------------------------------

/// Administrative status of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStatus {
    Active,
    Suspended,
    /// Retired account, kept queryable.
    Archived,
}

impl IdentityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityStatus::Active => "active",
            IdentityStatus::Suspended => "suspended",
            IdentityStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for IdentityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(IdentityStatus::Active),
            "suspended" => Ok(IdentityStatus::Suspended),
            "archived" => Ok(IdentityStatus::Archived),
            other => Err(format!("invalid identity status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Quota caps and entitlements derived from a tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    pub daily_limit: u64,
    pub monthly_limit: u64,
    /// Action/tool names this tier may use; `"*"` grants everything.
    pub entitlements: BTreeSet<String>,
}

impl TierLimits {
    pub fn allows(&self, key: &str) -> bool {
        self.entitlements.contains(ALL_TOOLS) || self.entitlements.contains(key)
    }
}

/// One row of the configured tier table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPolicy {
    pub tier: Tier,
    pub daily_limit: u64,
    pub monthly_limit: u64,
    /// Entitled action/tool names. `["*"]` grants everything.
    ///
    /// `transform` is entitled per tool, so list tool names (`"watermark"`)
    /// rather than `"transform"`.
    #[serde(default)]
    pub tools: Vec<String>,
}

impl TierPolicy {
    pub fn limits(&self) -> TierLimits {
        TierLimits {
            daily_limit: self.daily_limit,
            monthly_limit: self.monthly_limit,
            entitlements: self.tools.iter().cloned().collect(),
        }
    }

    pub fn allows(&self, key: &str) -> bool {
        self.tools.iter().any(|t| t == ALL_TOOLS || t == key)
    }
}

/// The default tier table: a restricted free tier and an all-access premium tier.
///
/// The free tier gets every non-transform built-in plus the `watermark` tool.
pub fn default_tier_policies() -> Vec<TierPolicy> {
    vec![
        TierPolicy {
            tier: Tier::Free,
            daily_limit: 10,
            monthly_limit: 100,
            tools: ["watermark", "notify", "relocate", "delete", "delay"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        },
        TierPolicy {
            tier: Tier::Premium,
            daily_limit: 1_000,
            monthly_limit: 20_000,
            tools: vec![ALL_TOOLS.to_string()],
        },
    ]
}

// ---------------------------------------------------------------------------
// UsageRecord
// ---------------------------------------------------------------------------

/// Durable per-identity quota state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Caller key (e.g. wallet address).
    pub identity: String,
    pub tier: Tier,
    pub status: IdentityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub premium_expires_at: Option<DateTime<Utc>>,
    pub daily_used: u64,
    /// The daily counter is zeroed once this instant has passed.
    pub daily_reset_at: DateTime<Utc>,
    pub monthly_used: u64,
    /// The monthly counter is zeroed once this instant has passed.
    pub monthly_reset_at: DateTime<Utc>,
    pub limits: TierLimits,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UsageRecord {
    /// Whether an expiring tier's expiry has passed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.tier.expires()
            && self
                .premium_expires_at
                .is_some_and(|expires_at| expires_at <= now)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
