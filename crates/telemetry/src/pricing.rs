//! Built-in pricing table for the models Switchboard dispatches to.
//!
//! Prices are in USD per 1 million tokens. Each model has an input and
//! output price. Custom pricing can be added from the TOML config.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per 1M input tokens in USD.
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD.
    pub output_per_m: f64,
}

impl ModelPricing {
    /// Create a new pricing entry.
    pub const fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
        }
    }

    /// Compute cost in USD for the given token counts.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * self.input_per_m + output_tokens as f64 * self.output_per_m)
            / 1_000_000.0
    }
}

/// Price charged for models missing from the table. Mid-tier so unknown
/// models are not undercharged.
pub const DEFAULT_PRICING: ModelPricing = ModelPricing::new(1.0, 5.0);

const BUILTIN_PRICES: &[(&str, f64, f64)] = &[
    // ── OpenAI GPT-5 ───────────────────────────────────────────
    ("gpt-5-nano", 0.05, 0.40),
    ("gpt-5-mini", 0.25, 2.00),
    ("gpt-5", 1.00, 4.00),
    ("gpt-5-pro", 3.00, 12.00),
    ("gpt-5.1", 1.25, 5.00),
    // ── OpenAI GPT-4 ───────────────────────────────────────────
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4-turbo", 10.00, 30.00),
    // ── Anthropic ──────────────────────────────────────────────
    ("claude-opus-4-5", 15.00, 75.00),
    ("claude-sonnet-4-5", 3.00, 15.00),
    ("claude-haiku-4-5", 0.80, 4.00),
    ("claude-opus-4-1", 15.00, 75.00),
    ("claude-sonnet-4", 3.00, 15.00),
    // ── Google ─────────────────────────────────────────────────
    ("gemini-2.0-flash", 0.075, 0.30),
    ("gemini-2.5-flash", 0.15, 0.60),
    ("gemini-2.5-pro", 1.25, 5.00),
    ("gemini-3-pro", 1.50, 6.00),
    // ── Cohere ─────────────────────────────────────────────────
    ("command-r-plus", 2.50, 10.00),
    ("command-r", 0.15, 0.60),
    // ── Perplexity ─────────────────────────────────────────────
    ("sonar-pro", 3.00, 15.00),
    ("sonar", 1.00, 1.00),
];

/// Pricing table with built-in defaults and custom overrides.
///
/// Built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct PricingTable {
    prices: HashMap<String, ModelPricing>,
}

impl PricingTable {
    /// Create a pricing table with built-in model prices.
    pub fn with_defaults() -> Self {
        let prices = BUILTIN_PRICES
            .iter()
            .map(|(model, input, output)| (model.to_string(), ModelPricing::new(*input, *output)))
            .collect();
        Self { prices }
    }

    /// Create an empty pricing table.
    pub fn empty() -> Self {
        Self {
            prices: HashMap::new(),
        }
    }

    /// Add or update pricing for a model.
    pub fn set(&mut self, model: impl Into<String>, pricing: ModelPricing) {
        self.prices.insert(model.into(), pricing);
    }

    /// Exact lookup. Returns None if not found.
    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        self.prices.get(model).copied()
    }

    /// Resolve pricing for a model id.
    ///
    /// Exact match first, then the longest table key that prefixes the id
    /// (`gpt-5-nano-2025-08-07` resolves to `gpt-5-nano`, not `gpt-5`),
    /// then [`DEFAULT_PRICING`].
    pub fn lookup(&self, model: &str) -> ModelPricing {
        if let Some(p) = self.prices.get(model) {
            return *p;
        }

        self.prices
            .iter()
            .filter(|(key, _)| model.starts_with(key.as_str()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, p)| *p)
            .unwrap_or(DEFAULT_PRICING)
    }

    /// Cost in USD for a model call.
    pub fn compute_cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        self.lookup(model).cost(input_tokens, output_tokens)
    }

    /// Cost in whole cents, rounded up. Any non-zero usage costs at least one cent.
    pub fn cost_cents(&self, model: &str, input_tokens: u64, output_tokens: u64) -> i64 {
        if input_tokens == 0 && output_tokens == 0 {
            return 0;
        }
        let cents = self.compute_cost(model, input_tokens, output_tokens) * 100.0;
        // Absorb float noise so exact cent amounts are not bumped up
        let rounded = (cents - 1e-9).ceil() as i64;
        rounded.max(1)
    }

    /// List all known model names, sorted.
    pub fn models(&self) -> Vec<String> {
        let mut names: Vec<String> = self.prices.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of models in the pricing table.
    pub fn len(&self) -> usize {
        self.prices.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Render a cent amount for people: `0¢`, `42¢`, `$3.05`.
pub fn format_cost_display(cost_cents: i64) -> String {
    if cost_cents < 100 {
        format!("{}¢", cost_cents.max(0))
    } else {
        format!("${}.{:02}", cost_cents / 100, cost_cents % 100)
    }
}
