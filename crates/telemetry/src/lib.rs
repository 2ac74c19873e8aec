//! Token estimation, model pricing and usage recording for Switchboard.
//!
//! Usage is reconciled after a turn completes: tokens are estimated from the
//! text that was actually sent and received, priced from a static table, and
//! written to the usage log and monthly aggregates.

pub mod pricing;
pub mod recorder;
pub mod tokens;

pub use pricing::{DEFAULT_PRICING, ModelPricing, PricingTable, format_cost_display};
pub use recorder::{TurnUsage, UsageRecorder};
pub use tokens::{count_conversation_tokens, count_tokens, warm_up as warm_up_tokenizers};

/// Build the pricing table from configuration overrides.
pub fn pricing_from_config(config: &switchboard_config::AppConfig) -> PricingTable {
    let mut table = PricingTable::with_defaults();
    for (model, price) in &config.pricing {
        table.set(model.clone(), ModelPricing::new(price.input_per_m, price.output_per_m));
    }
    table
}
