//! Access gate: per-identity authorization and quota accounting.
//!
//! The gate decides whether an identity may run a gated action, in this
//! order (first failing check wins):
//!
//! 1. identity registered
//! 2. status active
//! 3. expiring tier not past its expiry
//! 4. action/tool in the tier's entitlement set
//! 5. daily usage below the daily cap
//! 6. monthly usage below the monthly cap
//!
//! Rejections are decisions, not errors: they carry a machine-readable
//! reason and enough detail for the caller to self-remediate.
//!
//! Every read-check-write on one identity runs under that identity's lock.
//! Different identities never contend.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use flowgate_types::error::RepositoryError;
use flowgate_types::tier::{IdentityStatus, Tier, TierPolicy, UsageRecord};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::store::UsageStore;
use super::window::{increment_usage, new_usage_record, roll_windows};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Failures of the quota subsystem itself (as opposed to access denials).
#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error("storage error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("identity '{0}' is not registered")]
    NotRegistered(String),

    #[error("identity '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("tier '{0}' has no configured policy")]
    UnknownTier(Tier),

    #[error("usage not recorded: {0}")]
    LimitExceeded(Box<AccessDenial>),
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// Machine-readable rejection reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DenialReason {
    NotRegistered,
    Inactive,
    PremiumExpired,
    NotEntitled,
    DailyLimitExceeded,
    MonthlyLimitExceeded,
}

impl DenialReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenialReason::NotRegistered => "not-registered",
            DenialReason::Inactive => "inactive",
            DenialReason::PremiumExpired => "premium-expired",
            DenialReason::NotEntitled => "not-entitled",
            DenialReason::DailyLimitExceeded => "daily-limit-exceeded",
            DenialReason::MonthlyLimitExceeded => "monthly-limit-exceeded",
        }
    }
}

/// Context attached to a denial. Only the fields relevant to the reason are set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenialDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<IdentityStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resets_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_tier: Option<Tier>,
}

/// A rejected access attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDenial {
    pub reason: DenialReason,
    pub message: String,
    pub details: DenialDetails,
}

impl std::fmt::Display for AccessDenial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.reason.code(), self.message)
    }
}

/// Outcome of `check_access`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny(AccessDenial),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }

    pub fn denial(&self) -> Option<&AccessDenial> {
        match self {
            AccessDecision::Allow => None,
            AccessDecision::Deny(denial) => Some(denial),
        }
    }
}

/// Evaluate the gate checks against a (window-rolled) record.
///
/// Pure: performs no I/O and never mutates usage.
pub fn evaluate(
    record: Option<&UsageRecord>,
    key: &str,
    tiers: &[TierPolicy],
    now: DateTime<Utc>,
) -> AccessDecision {
    let Some(record) = record else {
        return AccessDecision::Deny(AccessDenial {
            reason: DenialReason::NotRegistered,
            message: "identity is not registered".to_string(),
            details: DenialDetails::default(),
        });
    };

    if record.status != IdentityStatus::Active {
        return AccessDecision::Deny(AccessDenial {
            reason: DenialReason::Inactive,
            message: format!("identity is {}", record.status),
            details: DenialDetails {
                status: Some(record.status),
                ..Default::default()
            },
        });
    }

    if record.is_expired_at(now) {
        let expired_at = record.premium_expires_at;
        return AccessDecision::Deny(AccessDenial {
            reason: DenialReason::PremiumExpired,
            message: match expired_at {
                Some(at) => format!("{} tier expired on {}", record.tier, at.format("%Y-%m-%d")),
                None => format!("{} tier expired", record.tier),
            },
            details: DenialDetails {
                tier: Some(record.tier),
                expired_at,
                ..Default::default()
            },
        });
    }

    if !record.limits.allows(key) {
        let suggested_tier = tiers
            .iter()
            .find(|p| p.tier != record.tier && p.allows(key))
            .map(|p| p.tier);
        return AccessDecision::Deny(AccessDenial {
            reason: DenialReason::NotEntitled,
            message: match suggested_tier {
                Some(tier) => format!(
                    "'{key}' is not available on the {} tier; upgrade to {tier}",
                    record.tier
                ),
                None => format!("'{key}' is not available on the {} tier", record.tier),
            },
            details: DenialDetails {
                tier: Some(record.tier),
                suggested_tier,
                ..Default::default()
            },
        });
    }

    match limit_denial(record) {
        Some(denial) => AccessDecision::Deny(denial),
        None => AccessDecision::Allow,
    }
}

/// The quota checks alone: daily cap, then monthly cap.
fn limit_denial(record: &UsageRecord) -> Option<AccessDenial> {
    if record.daily_used >= record.limits.daily_limit {
        return Some(AccessDenial {
            reason: DenialReason::DailyLimitExceeded,
            message: format!(
                "daily limit reached ({}/{}), resets at {}",
                record.daily_used,
                record.limits.daily_limit,
                record.daily_reset_at.to_rfc3339()
            ),
            details: DenialDetails {
                tier: Some(record.tier),
                used: Some(record.daily_used),
                limit: Some(record.limits.daily_limit),
                resets_at: Some(record.daily_reset_at),
                ..Default::default()
            },
        });
    }

    if record.monthly_used >= record.limits.monthly_limit {
        return Some(AccessDenial {
            reason: DenialReason::MonthlyLimitExceeded,
            message: format!(
                "monthly limit reached ({}/{}), resets at {}",
                record.monthly_used,
                record.limits.monthly_limit,
                record.monthly_reset_at.to_rfc3339()
            ),
            details: DenialDetails {
                tier: Some(record.tier),
                used: Some(record.monthly_used),
                limit: Some(record.limits.monthly_limit),
                resets_at: Some(record.monthly_reset_at),
                ..Default::default()
            },
        });
    }

    None
}

/// The next instant at which this record's usage headroom grows.
pub fn get_next_reset_time(record: &UsageRecord) -> DateTime<Utc> {
    record.daily_reset_at
}

// ---------------------------------------------------------------------------
// AccessGate
// ---------------------------------------------------------------------------

/// Authorizes gated actions and tracks usage, serialized per identity.
///
/// Generic over `S: UsageStore` for storage flexibility.
pub struct AccessGate<S: UsageStore> {
    store: Arc<S>,
    tiers: Vec<TierPolicy>,
    /// One lock per identity while it is held or awaited.
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl<S: UsageStore> AccessGate<S> {
    /// Create a gate over `store` using the given ordered tier table.
    pub fn new(store: Arc<S>, tiers: Vec<TierPolicy>) -> Self {
        Self {
            store,
            tiers,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn tiers(&self) -> &[TierPolicy] {
        &self.tiers
    }

    async fn lock(&self, identity: &str) -> IdentityGuard {
        let lock = self
            .locks
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        IdentityGuard {
            guard: Some(lock.lock_owned().await),
            locks: Arc::clone(&self.locks),
            identity: identity.to_string(),
        }
    }

    /// Load a record and apply any pending window rollover, persisting it.
    async fn load_rolled(
        &self,
        identity: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<UsageRecord>, QuotaError> {
        let Some(mut record) = self.store.get(identity).await? else {
            return Ok(None);
        };
        if roll_windows(&mut record, now) {
            tracing::debug!(identity, "usage window rolled over");
            self.store.update(&record).await?;
        }
        Ok(Some(record))
    }

    // -- Identity administration ------------------------------------------

    /// Register a new identity at `tier`, deriving its limits from the tier table.
    pub async fn register_identity(
        &self,
        identity: &str,
        tier: Tier,
        premium_expires_at: Option<DateTime<Utc>>,
    ) -> Result<UsageRecord, QuotaError> {
        let policy = self
            .tiers
            .iter()
            .find(|p| p.tier == tier)
            .ok_or(QuotaError::UnknownTier(tier))?;

        let _guard = self.lock(identity).await;
        let record = new_usage_record(identity, policy, premium_expires_at, Utc::now());
        self.store.insert(&record).await.map_err(|e| match e {
            RepositoryError::Conflict(_) => QuotaError::AlreadyRegistered(identity.to_string()),
            other => QuotaError::Repository(other),
        })?;

        tracing::info!(identity, tier = %tier, "identity registered");
        Ok(record)
    }

    /// Change an identity's administrative status (suspend, reactivate, archive).
    pub async fn set_status(
        &self,
        identity: &str,
        status: IdentityStatus,
    ) -> Result<UsageRecord, QuotaError> {
        let _guard = self.lock(identity).await;
        let mut record = self
            .store
            .get(identity)
            .await?
            .ok_or_else(|| QuotaError::NotRegistered(identity.to_string()))?;
        record.status = status;
        record.updated_at = Utc::now();
        self.store.update(&record).await?;

        tracing::info!(identity, status = %status, "identity status changed");
        Ok(record)
    }

    /// The identity's current record, if registered, with elapsed windows reset.
    pub async fn get_user_tier(&self, identity: &str) -> Result<Option<UsageRecord>, QuotaError> {
        self.get_user_tier_at(identity, Utc::now()).await
    }

    /// [`get_user_tier`](Self::get_user_tier) at an explicit instant.
    pub async fn get_user_tier_at(
        &self,
        identity: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<UsageRecord>, QuotaError> {
        let _guard = self.lock(identity).await;
        self.load_rolled(identity, now).await
    }

    /// Every registered identity.
    pub async fn identities(&self) -> Result<Vec<String>, QuotaError> {
        Ok(self.store.list_identities().await?)
    }

    // -- Decisions ----------------------------------------------------------

    /// Decide whether `identity` may run `key` now. Never charges usage.
    pub async fn check_access(
        &self,
        identity: &str,
        key: &str,
    ) -> Result<AccessDecision, QuotaError> {
        self.check_access_at(identity, key, Utc::now()).await
    }

    /// [`check_access`](Self::check_access) evaluated at an explicit instant.
    pub async fn check_access_at(
        &self,
        identity: &str,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<AccessDecision, QuotaError> {
        let _guard = self.lock(identity).await;
        let record = self.load_rolled(identity, now).await?;
        let decision = evaluate(record.as_ref(), key, &self.tiers, now);
        if let AccessDecision::Deny(denial) = &decision {
            tracing::info!(identity, key, reason = denial.reason.code(), "access denied");
        }
        Ok(decision)
    }

    /// Charge one unit of usage to `identity`.
    ///
    /// Call exactly once per successfully completed gated action. The caps
    /// are re-checked under the identity's lock, so when two callers both
    /// passed `check_access` at `limit - 1` only the first charge lands and
    /// the second fails with [`QuotaError::LimitExceeded`].
    pub async fn record_usage(&self, identity: &str, key: &str) -> Result<UsageRecord, QuotaError> {
        self.record_usage_at(identity, key, Utc::now()).await
    }

    /// [`record_usage`](Self::record_usage) at an explicit instant.
    pub async fn record_usage_at(
        &self,
        identity: &str,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<UsageRecord, QuotaError> {
        let _guard = self.lock(identity).await;
        charge(self.store.as_ref(), identity, key, now).await
    }

    /// Check access and, if allowed, hold the identity's lock until the
    /// returned permit is committed or dropped.
    ///
    /// This makes check-then-record one indivisible step per identity: two
    /// concurrent callers at `limit - 1` cannot both pass.
    pub async fn authorize(&self, identity: &str, key: &str) -> Result<Authorization<S>, QuotaError> {
        self.authorize_at(identity, key, Utc::now()).await
    }

    /// [`authorize`](Self::authorize) at an explicit instant.
    pub async fn authorize_at(
        &self,
        identity: &str,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Authorization<S>, QuotaError> {
        let guard = self.lock(identity).await;
        let record = self.load_rolled(identity, now).await?;

        match evaluate(record.as_ref(), key, &self.tiers, now) {
            AccessDecision::Allow => Ok(Authorization::Granted(UsagePermit {
                store: Arc::clone(&self.store),
                identity: identity.to_string(),
                key: key.to_string(),
                _guard: guard,
            })),
            AccessDecision::Deny(denial) => {
                tracing::info!(identity, key, reason = denial.reason.code(), "access denied");
                Ok(Authorization::Denied(denial))
            }
        }
    }

    // -- Maintenance --------------------------------------------------------

    /// Zero every counter whose window boundary has passed.
    ///
    /// Returns the number of records that were reset.
    pub async fn sweep_resets(&self, now: DateTime<Utc>) -> Result<usize, QuotaError> {
        let identities = self.store.list_identities().await?;
        let mut reset = 0;

        for identity in identities {
            let _guard = self.lock(&identity).await;
            if let Some(mut record) = self.store.get(&identity).await? {
                if roll_windows(&mut record, now) {
                    self.store.update(&record).await?;
                    reset += 1;
                }
            }
        }

        if reset > 0 {
            tracing::info!(reset, "usage reset sweep completed");
        }
        Ok(reset)
    }
}

async fn charge<S: UsageStore>(
    store: &S,
    identity: &str,
    key: &str,
    now: DateTime<Utc>,
) -> Result<UsageRecord, QuotaError> {
    let mut record = store
        .get(identity)
        .await?
        .ok_or_else(|| QuotaError::NotRegistered(identity.to_string()))?;
    roll_windows(&mut record, now);
    if let Some(denial) = limit_denial(&record) {
        tracing::warn!(identity, key, reason = denial.reason.code(), "usage not recorded");
        return Err(QuotaError::LimitExceeded(Box::new(denial)));
    }
    increment_usage(&mut record, now);
    store.update(&record).await?;

    tracing::debug!(
        identity,
        key,
        daily_used = record.daily_used,
        monthly_used = record.monthly_used,
        "usage recorded"
    );
    Ok(record)
}

/// A held identity lock. Dropping it releases the lock and forgets the
/// identity's map entry once no other task holds or awaits it.
struct IdentityGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    identity: String,
}

impl Drop for IdentityGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.identity, |_, lock| Arc::strong_count(lock) == 1);
    }
}

// ---------------------------------------------------------------------------
// Authorization / UsagePermit
// ---------------------------------------------------------------------------

/// Result of [`AccessGate::authorize`].
pub enum Authorization<S: UsageStore> {
    Granted(UsagePermit<S>),
    Denied(AccessDenial),
}

/// An allowed access still holding the identity's lock.
///
/// `commit` charges usage; dropping without committing releases the lock
/// and charges nothing.
pub struct UsagePermit<S: UsageStore> {
    store: Arc<S>,
    identity: String,
    key: String,
    _guard: IdentityGuard,
}

impl<S: UsageStore> UsagePermit<S> {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Record one unit of usage and release the lock.
    pub async fn commit(self) -> Result<UsageRecord, QuotaError> {
        charge(self.store.as_ref(), &self.identity, &self.key, Utc::now()).await
    }
}

impl<S: UsageStore> std::fmt::Debug for UsagePermit<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsagePermit")
            .field("identity", &self.identity)
            .field("key", &self.key)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
