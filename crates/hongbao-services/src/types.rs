//! Request and result types for the envelope service.

use hongbao_core::{
    luckiest_claim, Claim, Envelope, EnvelopeToken, Points, SplitMode, UserId, Visibility,
};
use serde::{Deserialize, Serialize};

/// Everything a funder supplies when creating an envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEnvelopeRequest {
    pub funder: UserId,
    pub funder_name: String,
    pub total_amount: Points,
    pub total_slices: u32,
    pub mode: SplitMode,
    pub visibility: Visibility,
    /// Blank messages are replaced with the configured default.
    pub message: String,
    pub chat_id: Option<i64>,
}

impl CreateEnvelopeRequest {
    /// A public, randomly split envelope with the default message.
    pub fn new(funder: UserId, total_amount: Points, total_slices: u32) -> Self {
        Self {
            funder,
            funder_name: funder.to_string(),
            total_amount,
            total_slices,
            mode: SplitMode::Random,
            visibility: Visibility::Public,
            message: String::new(),
            chat_id: None,
        }
    }

    pub fn mode(mut self, mode: SplitMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn targeted(mut self, target: UserId) -> Self {
        self.visibility = Visibility::Targeted {
            target,
            target_name: None,
        };
        self
    }

    pub fn targeted_named(mut self, target: UserId, target_name: impl Into<String>) -> Self {
        self.visibility = Visibility::Targeted {
            target,
            target_name: Some(target_name.into()),
        };
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn funder_name(mut self, name: impl Into<String>) -> Self {
        self.funder_name = name.into();
        self
    }

    pub fn chat(mut self, chat_id: i64) -> Self {
        self.chat_id = Some(chat_id);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedEnvelope {
    pub token: EnvelopeToken,
    pub total_amount: Points,
    pub total_slices: u32,
    pub message: String,
    pub expires_at_ms: i64,
}

/// Result of a successful claim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimOutcome {
    pub amount: Points,
    /// 1-based position of this claim within the envelope.
    pub slice_index: u32,
    pub remaining_slices: u32,
    /// This claim took the last slice.
    pub is_finished: bool,
    /// Only ever true on the finishing claim, when the finisher is also the luckiest.
    pub is_luckiest: bool,
    pub total_amount: Points,
    pub total_slices: u32,
    pub funder_name: String,
    pub message: String,
}

/// Read-only view of an envelope and its claims.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeSummary {
    pub envelope: Envelope,
    /// Ordered by claim time.
    pub claims: Vec<Claim>,
}

impl EnvelopeSummary {
    /// The flagged luckiest claim, or the would-be luckiest while the envelope is open.
    pub fn luckiest(&self) -> Option<&Claim> {
        self.claims
            .iter()
            .find(|c| c.is_luckiest)
            .or_else(|| luckiest_claim(&self.claims))
    }

    pub fn claimed_amount(&self) -> Points {
        self.claims.iter().map(|c| c.amount).sum()
    }
}

/// An envelope this process moved to `Expired`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiredEnvelope {
    pub token: EnvelopeToken,
    pub funder: UserId,
    /// Points credited back to the funder (zero when refunds are disabled).
    pub refunded: Points,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Candidates returned by the store.
    pub examined: usize,
    pub expired: Vec<ExpiredEnvelope>,
    /// Exhausted envelopes whose finish step was completed by the sweep.
    pub repaired: usize,
    pub failures: usize,
}

impl SweepReport {
    pub fn refunded_points(&self) -> Points {
        self.expired.iter().map(|e| e.refunded).sum()
    }
}
