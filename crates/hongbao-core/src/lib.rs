use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod clock;
pub mod config;
pub mod ledger;
pub mod metrics;
pub mod pool;
pub mod split;
pub mod store;
pub mod token;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EnvelopeConfig, HongbaoConfig};
pub use ledger::PointsLedger;
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use pool::{PoolCommand, PoolEffects, PoolError, PoolState};
pub use split::split_amount;
pub use store::{EnvelopeStore, SliceCommit, SliceRevoke};

/// Integer point amount. Ledger balances and envelope pools are never negative.
pub type Points = u64;

/// Chat-platform identity of a funder or claimant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque envelope handle exposed to clients instead of a storage row id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvelopeToken(String);

impl EnvelopeToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EnvelopeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How each claim's share is computed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitMode {
    /// Double-average random split.
    #[default]
    Random,
    /// Uniform split; the remainder rolls forward to the last slice.
    Equal,
}

impl SplitMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SplitMode::Random => "random",
            SplitMode::Equal => "equal",
        }
    }
}

impl std::str::FromStr for SplitMode {
    type Err = HongbaoError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "random" => Ok(SplitMode::Random),
            "equal" => Ok(SplitMode::Equal),
            other => Err(HongbaoError::InvalidRequest(format!(
                "unknown split mode '{other}' (expected random or equal)"
            ))),
        }
    }
}

/// Who may claim an envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum Visibility {
    Public,
    Targeted {
        target: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_name: Option<String>,
    },
}

impl Visibility {
    pub fn target(&self) -> Option<UserId> {
        match self {
            Visibility::Public => None,
            Visibility::Targeted { target, .. } => Some(*target),
        }
    }

    pub fn is_targeted(&self) -> bool {
        matches!(self, Visibility::Targeted { .. })
    }
}

/// Envelope lifecycle. `Finished` and `Expired` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
    Active,
    Finished,
    Expired,
}

impl EnvelopeStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, EnvelopeStatus::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeStatus::Active => "active",
            EnvelopeStatus::Finished => "finished",
            EnvelopeStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for EnvelopeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One funded giveaway.
///
/// Invariants (checked by [`Envelope::check_invariants`]):
/// - `total_amount >= total_slices >= 1`
/// - `remaining_amount >= remaining_slices`
/// - remaining counters never exceed the totals
/// - `Finished` implies both remaining counters are zero
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub token: EnvelopeToken,
    pub funder: UserId,
    pub funder_name: String,
    pub total_amount: Points,
    pub total_slices: u32,
    pub remaining_amount: Points,
    pub remaining_slices: u32,
    /// Slices ever committed. Never decreases, so revoked slices do not free their index.
    #[serde(default)]
    pub slices_issued: u32,
    pub mode: SplitMode,
    pub visibility: Visibility,
    pub message: String,
    /// Chat the envelope was posted in, if the calling surface supplied one.
    #[serde(default)]
    pub chat_id: Option<i64>,
    /// Message hosting the envelope, attached after the surface posts it.
    #[serde(default)]
    pub message_id: Option<i64>,
    pub status: EnvelopeStatus,
    pub created_at_ms: i64,
    pub expires_at_ms: i64,
}

impl Envelope {
    /// The shared mutable triple that claims and the expiry sweep contend on.
    pub fn pool(&self) -> PoolState {
        PoolState {
            remaining_amount: self.remaining_amount,
            remaining_slices: self.remaining_slices,
            status: self.status,
        }
    }

    pub fn apply_pool(&mut self, pool: &PoolState) {
        self.remaining_amount = pool.remaining_amount;
        self.remaining_slices = pool.remaining_slices;
        self.status = pool.status;
    }

    pub fn target(&self) -> Option<UserId> {
        self.visibility.target()
    }

    pub fn is_past_expiry(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }

    /// Points already handed out to claimants.
    pub fn claimed_amount(&self) -> Points {
        self.total_amount.saturating_sub(self.remaining_amount)
    }

    pub fn claimed_slices(&self) -> u32 {
        self.total_slices.saturating_sub(self.remaining_slices)
    }

    pub fn check_invariants(&self) -> Result<()> {
        if self.total_slices == 0 || self.total_amount < self.total_slices as Points {
            return Err(HongbaoError::OperationFailed(format!(
                "envelope {} has inconsistent totals",
                self.token
            )));
        }
        if self.remaining_amount > self.total_amount || self.remaining_slices > self.total_slices {
            return Err(HongbaoError::OperationFailed(format!(
                "envelope {} remaining counters exceed totals",
                self.token
            )));
        }
        if self.slices_issued < self.claimed_slices() {
            return Err(HongbaoError::OperationFailed(format!(
                "envelope {} issued fewer slices than it has claims",
                self.token
            )));
        }
        pool::check_invariants(&self.pool())
            .map_err(|e| HongbaoError::OperationFailed(format!("envelope {}: {e}", self.token)))
    }
}

/// One successful distribution event. At most one per (envelope, claimant).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub token: EnvelopeToken,
    pub claimant: UserId,
    pub claimant_name: String,
    pub amount: Points,
    /// 1-based issue order of the slice this claim consumed. Revoked slices leave gaps.
    pub slice_index: u32,
    pub is_luckiest: bool,
    pub claimed_at_ms: i64,
}

/// Pick the luckiest claim: largest amount, ties to the earliest claim.
pub fn luckiest_claim(claims: &[Claim]) -> Option<&Claim> {
    claims.iter().min_by(|a, b| {
        b.amount
            .cmp(&a.amount)
            .then(a.claimed_at_ms.cmp(&b.claimed_at_ms))
            .then(a.slice_index.cmp(&b.slice_index))
    })
}

/// Administrative toggles that can reject envelope creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Feature {
    RedEnvelopes,
    TargetedEnvelopes,
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feature::RedEnvelopes => f.write_str("red envelopes"),
            Feature::TargetedEnvelopes => f.write_str("targeted red envelopes"),
        }
    }
}

/// Unified error type for red-envelope operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HongbaoError {
    // Creation
    #[error("{0} are disabled")]
    FeatureDisabled(Feature),

    #[error("invalid amount: {0}")]
    InvalidAmount(&'static str),

    #[error("slice count must be between 1 and {max}")]
    InvalidSliceCount { max: u32 },

    #[error("insufficient balance: need {required}, have {available}")]
    InsufficientBalance { available: Points, required: Points },

    // Lookup / state
    #[error("red envelope not found")]
    EnvelopeNotFound,

    #[error("red envelope has expired")]
    EnvelopeExpired,

    #[error("red envelope has been fully claimed")]
    EnvelopeFinished,

    // Eligibility
    #[error("cannot claim your own red envelope")]
    CannotClaimOwn,

    #[error("this red envelope is reserved for another user")]
    NotTargetUser,

    #[error("you have already claimed this red envelope")]
    AlreadyClaimed,

    // Infrastructure
    #[error("operation failed, try again: {0}")]
    OperationFailed(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("configuration error: {0}")]
    ConfigError(String),
}

/// Stable numeric codes for logging and surface-side dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // Creation (1000-1099)
    FeatureDisabled = 1000,
    InvalidAmount = 1001,
    InvalidSliceCount = 1002,
    InsufficientBalance = 1003,
    InvalidRequest = 1004,

    // Lookup / state (1100-1199)
    EnvelopeNotFound = 1100,
    EnvelopeExpired = 1101,
    EnvelopeFinished = 1102,

    // Eligibility (1200-1299)
    CannotClaimOwn = 1200,
    NotTargetUser = 1201,
    AlreadyClaimed = 1202,

    // Infrastructure (1900-1999)
    OperationFailed = 1900,
    Storage = 1901,
    Config = 1902,
}

impl ErrorCode {
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl HongbaoError {
    pub fn code(&self) -> ErrorCode {
        match self {
            HongbaoError::FeatureDisabled(_) => ErrorCode::FeatureDisabled,
            HongbaoError::InvalidAmount(_) => ErrorCode::InvalidAmount,
            HongbaoError::InvalidSliceCount { .. } => ErrorCode::InvalidSliceCount,
            HongbaoError::InsufficientBalance { .. } => ErrorCode::InsufficientBalance,
            HongbaoError::EnvelopeNotFound => ErrorCode::EnvelopeNotFound,
            HongbaoError::EnvelopeExpired => ErrorCode::EnvelopeExpired,
            HongbaoError::EnvelopeFinished => ErrorCode::EnvelopeFinished,
            HongbaoError::CannotClaimOwn => ErrorCode::CannotClaimOwn,
            HongbaoError::NotTargetUser => ErrorCode::NotTargetUser,
            HongbaoError::AlreadyClaimed => ErrorCode::AlreadyClaimed,
            HongbaoError::OperationFailed(_) => ErrorCode::OperationFailed,
            HongbaoError::Storage(_) => ErrorCode::Storage,
            HongbaoError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            HongbaoError::ConfigError(_) => ErrorCode::Config,
        }
    }

    /// Expected business outcomes; retrying the same request will not change them.
    pub fn is_domain(&self) -> bool {
        !matches!(
            self,
            HongbaoError::OperationFailed(_)
                | HongbaoError::Storage(_)
                | HongbaoError::ConfigError(_)
        )
    }

    /// Transient failures the engine retries internally before giving up.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HongbaoError::Storage(_))
    }
}

pub type Result<T> = std::result::Result<T, HongbaoError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn claim(claimant: i64, amount: Points, at: i64, slice: u32) -> Claim {
        Claim {
            token: EnvelopeToken::new("t"),
            claimant: UserId(claimant),
            claimant_name: format!("user{claimant}"),
            amount,
            slice_index: slice,
            is_luckiest: false,
            claimed_at_ms: at,
        }
    }

    #[test]
    fn domain_errors_have_distinct_messages() {
        let errors = [
            HongbaoError::FeatureDisabled(Feature::RedEnvelopes),
            HongbaoError::FeatureDisabled(Feature::TargetedEnvelopes),
            HongbaoError::InvalidAmount("amount must be positive"),
            HongbaoError::InvalidSliceCount { max: 100 },
            HongbaoError::InsufficientBalance {
                available: 1,
                required: 2,
            },
            HongbaoError::EnvelopeNotFound,
            HongbaoError::EnvelopeExpired,
            HongbaoError::EnvelopeFinished,
            HongbaoError::CannotClaimOwn,
            HongbaoError::NotTargetUser,
            HongbaoError::AlreadyClaimed,
        ];
        let messages: HashSet<String> = errors.iter().map(|e| e.to_string()).collect();
        assert_eq!(messages.len(), errors.len());

        let codes: HashSet<u16> = errors.iter().map(|e| e.code().code()).collect();
        // The two feature toggles share a code; every other variant is unique.
        assert_eq!(codes.len(), errors.len() - 1);
        assert!(errors.iter().all(HongbaoError::is_domain));
    }

    #[test]
    fn only_storage_errors_are_retryable() {
        assert!(HongbaoError::Storage("connection reset".into()).is_retryable());
        assert!(!HongbaoError::OperationFailed("x".into()).is_retryable());
        assert!(!HongbaoError::EnvelopeFinished.is_retryable());
        assert!(!HongbaoError::OperationFailed("x".into()).is_domain());
    }

    #[test]
    fn luckiest_prefers_largest_then_earliest() {
        let claims = vec![
            claim(1, 10, 100, 1),
            claim(2, 30, 200, 2),
            claim(3, 30, 150, 3),
            claim(4, 5, 50, 4),
        ];
        assert_eq!(luckiest_claim(&claims).map(|c| c.claimant), Some(UserId(3)));

        // Same timestamp: slice order decides.
        let tied = vec![claim(7, 9, 100, 2), claim(8, 9, 100, 1)];
        assert_eq!(luckiest_claim(&tied).map(|c| c.claimant), Some(UserId(8)));

        assert!(luckiest_claim(&[]).is_none());
    }

    #[test]
    fn split_mode_parses_wire_names() {
        assert_eq!("random".parse::<SplitMode>(), Ok(SplitMode::Random));
        assert_eq!("equal".parse::<SplitMode>(), Ok(SplitMode::Equal));
        assert!(matches!(
            "lucky".parse::<SplitMode>(),
            Err(HongbaoError::InvalidRequest(_))
        ));
    }

    #[test]
    fn envelope_serializes_with_lowercase_tags() {
        let env = Envelope {
            token: EnvelopeToken::new("abc"),
            funder: UserId(1),
            funder_name: "alice".into(),
            total_amount: 10,
            total_slices: 2,
            remaining_amount: 10,
            remaining_slices: 2,
            slices_issued: 0,
            mode: SplitMode::Equal,
            visibility: Visibility::Targeted {
                target: UserId(2),
                target_name: None,
            },
            message: "hi".into(),
            chat_id: None,
            message_id: None,
            status: EnvelopeStatus::Active,
            created_at_ms: 0,
            expires_at_ms: 1,
        };
        let json = serde_json::to_value(&env).expect("serialize");
        assert_eq!(json["mode"], "equal");
        assert_eq!(json["status"], "active");
        assert_eq!(json["visibility"]["kind"], "targeted");
        assert!(env.check_invariants().is_ok());
    }
}
