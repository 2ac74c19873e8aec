//! Post-hoc usage accounting for completed chat turns.

use chrono::Utc;
use std::sync::Arc;
use switchboard_core::message::Message;
use switchboard_core::routing::TaskCategory;
use switchboard_core::store::{UsageRecord, UsageSink};
use tracing::{info, warn};

use crate::pricing::PricingTable;
use crate::tokens::{count_conversation_tokens, count_tokens};

/// Everything known about a finished turn that billing needs.
#[derive(Debug, Clone)]
pub struct TurnUsage {
    pub user_id: String,
    pub resolved_model: String,
    pub requested_model: String,
    pub category: Option<TaskCategory>,
    /// Messages exactly as sent to the provider
    pub input: Vec<Message>,
    pub output: String,
    pub web_search: bool,
    pub documents: bool,
}

/// Estimates tokens, prices the turn, and persists the result.
#[derive(Clone)]
pub struct UsageRecorder {
    sink: Arc<dyn UsageSink>,
    pricing: Arc<PricingTable>,
}

impl UsageRecorder {
    pub fn new(sink: Arc<dyn UsageSink>, pricing: Arc<PricingTable>) -> Self {
        Self { sink, pricing }
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Build the usage record for a turn without persisting it.
    ///
    /// Tokenizing is CPU-bound and scales with the input; async callers go
    /// through [`record`](Self::record), which runs this on the blocking pool.
    pub fn price(&self, turn: TurnUsage) -> UsageRecord {
        let input_tokens = count_conversation_tokens(&turn.input, &turn.resolved_model);
        let output_tokens = count_tokens(&turn.output, &turn.resolved_model);
        let cost_cents = self
            .pricing
            .cost_cents(&turn.resolved_model, input_tokens, output_tokens);

        UsageRecord {
            user_id: turn.user_id,
            resolved_model: turn.resolved_model,
            requested_model: turn.requested_model,
            category: turn.category,
            input_tokens,
            output_tokens,
            cost_cents,
            web_search: turn.web_search,
            documents: turn.documents,
            timestamp: Utc::now(),
        }
    }

    /// Price and persist a turn. Failures are logged and swallowed; the
    /// user has already received the response.
    pub async fn record(&self, turn: TurnUsage) -> Option<UsageRecord> {
        let pricer = self.clone();
        let record = match tokio::task::spawn_blocking(move || pricer.price(turn)).await {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Usage pricing task failed");
                return None;
            }
        };

        match self.sink.record_usage(&record).await {
            Ok(()) => {
                info!(
                    user_id = %record.user_id,
                    model = %record.resolved_model,
                    input_tokens = record.input_tokens,
                    output_tokens = record.output_tokens,
                    cost_cents = record.cost_cents,
                    "Recorded usage"
                );
                Some(record)
            }
            Err(e) => {
                warn!(
                    user_id = %record.user_id,
                    model = %record.resolved_model,
                    error = %e,
                    "Failed to record usage"
                );
                None
            }
        }
    }
}
