//! Task categories used to route a turn to a backend model.

use serde::{Deserialize, Serialize};

/// Classification is decoded greedily so the same message always routes
/// the same way.
pub const CLASSIFIER_TEMPERATURE: f32 = 0.0;

/// The fixed set of task categories the intent router chooses from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskCategory {
    Simple,
    General,
    Coding,
    Writing,
    Analysis,
    Science,
    Realtime,
}

impl TaskCategory {
    pub const ALL: [TaskCategory; 7] = [
        Self::Simple,
        Self::General,
        Self::Coding,
        Self::Writing,
        Self::Analysis,
        Self::Science,
        Self::Realtime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::General => "general",
            Self::Coding => "coding",
            Self::Writing => "writing",
            Self::Analysis => "analysis",
            Self::Science => "science",
            Self::Realtime => "realtime",
        }
    }
}

impl std::fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == lower)
            .ok_or_else(|| format!("unknown task category '{s}'"))
    }
}

/// The outcome of routing for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub category: TaskCategory,
    pub resolved_model: String,
}
