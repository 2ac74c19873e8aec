//! Model descriptors: static facts about each backend model.
//!
//! Descriptors are built once from configuration and never mutated while
//! serving requests.

use serde::{Deserialize, Serialize};

/// Which provider API a model is served through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFamily {
    OpenAi,
    Anthropic,
    Google,
    Perplexity,
}

impl ProviderFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::Perplexity => "perplexity",
        }
    }

    pub fn all() -> [ProviderFamily; 4] {
        [Self::OpenAi, Self::Anthropic, Self::Google, Self::Perplexity]
    }
}

impl std::fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "google" | "gemini" => Ok(Self::Google),
            "perplexity" => Ok(Self::Perplexity),
            other => Err(format!("unknown provider family '{other}'")),
        }
    }
}

/// Inclusive temperature bounds a model accepts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureRange {
    pub min: f32,
    pub max: f32,
}

impl TemperatureRange {
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Finite bounds with `min <= max`.
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }

    pub fn contains(&self, value: f32) -> bool {
        (self.min..=self.max).contains(&value)
    }

    /// Clamp `value` into the range. Never panics, even on a malformed range.
    pub fn clamp(&self, value: f32) -> f32 {
        if value.is_nan() {
            return self.min;
        }
        value.max(self.min).min(self.max)
    }
}

impl Default for TemperatureRange {
    fn default() -> Self {
        Self::new(0.0, 2.0)
    }
}

/// Static description of one backend model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Identifier sent to the provider API (e.g. "gpt-5-mini")
    pub id: String,

    pub family: ProviderFamily,

    #[serde(default)]
    pub temperature_range: TemperatureRange,

    /// Model rejects any temperature except `fixed_temperature`
    #[serde(default)]
    pub fixed_temperature_only: bool,

    #[serde(default = "default_fixed_temperature")]
    pub fixed_temperature: f32,

    /// Output token ceiling for a chat turn
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_fixed_temperature() -> f32 {
    1.0
}

fn default_max_tokens() -> u32 {
    16384
}

impl ModelDescriptor {
    pub fn new(id: impl Into<String>, family: ProviderFamily) -> Self {
        Self {
            id: id.into(),
            family,
            temperature_range: TemperatureRange::default(),
            fixed_temperature_only: false,
            fixed_temperature: default_fixed_temperature(),
            max_tokens: default_max_tokens(),
        }
    }

    pub fn with_range(mut self, min: f32, max: f32) -> Self {
        self.temperature_range = TemperatureRange::new(min, max);
        self
    }

    pub fn fixed(mut self, temperature: f32) -> Self {
        self.fixed_temperature_only = true;
        self.fixed_temperature = temperature;
        self
    }

    /// Whether requests to this model can be decoded at `temperature`.
    pub fn accepts_temperature(&self, temperature: f32) -> bool {
        if self.fixed_temperature_only {
            self.fixed_temperature == temperature
        } else {
            self.temperature_range.contains(temperature)
        }
    }

    /// The temperature actually sent for a requested value.
    pub fn effective_temperature(&self, requested: f32) -> f32 {
        if self.fixed_temperature_only {
            self.fixed_temperature
        } else {
            self.temperature_range.clamp(requested)
        }
    }
}
