//! Model routing for Switchboard.
//!
//! A request names either a concrete model id or `"auto"`. Explicit ids
//! bypass classification; `"auto"` sends the latest user message through
//! the [`IntentClassifier`] and maps the resulting category through the
//! [`RoutingTable`].

pub mod classifier;
pub mod table;

pub use classifier::{IntentClassifier, parse_category};
pub use table::{ModelCatalog, RoutingTable};

use switchboard_config::AppConfig;
use switchboard_core::message::{Message, last_user_index};
use switchboard_core::model::ModelDescriptor;
use switchboard_core::routing::{RoutingDecision, TaskCategory};
use switchboard_providers::ProviderRegistry;
use thiserror::Error;
use tracing::{info, warn};

/// The model name that asks for automatic routing.
pub const AUTO_MODEL: &str = "auto";

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("unknown model '{0}'")]
    UnknownModel(String),

    #[error("{0}")]
    UnknownCategory(String),

    #[error("routing table has no model for '{0}'")]
    UncoveredCategory(TaskCategory),
}

/// Where a request ends up.
#[derive(Debug, Clone)]
pub struct Route {
    pub model: ModelDescriptor,
    /// Set only when the model was chosen by classification.
    pub category: Option<TaskCategory>,
}

impl Route {
    pub fn decision(&self) -> Option<RoutingDecision> {
        self.category.map(|category| RoutingDecision {
            category,
            resolved_model: self.model.id.clone(),
        })
    }
}

/// Resolves the requested model name to a concrete [`ModelDescriptor`].
#[derive(Clone)]
pub struct IntentRouter {
    catalog: ModelCatalog,
    table: RoutingTable,
    classifier: IntentClassifier,
    fallback: ModelDescriptor,
}

impl IntentRouter {
    pub fn new(
        catalog: ModelCatalog,
        table: RoutingTable,
        classifier: IntentClassifier,
        fallback: ModelDescriptor,
    ) -> Self {
        Self {
            catalog,
            table,
            classifier,
            fallback,
        }
    }

    pub fn from_config(config: &AppConfig, registry: ProviderRegistry) -> Result<Self, RouterError> {
        let catalog = ModelCatalog::from_config(config);
        let table = RoutingTable::from_config(config, &catalog)?;
        let classifier = IntentClassifier::new(
            registry,
            catalog.require(&config.routing.classifier_model)?.clone(),
            config.routing.classifier_max_tokens,
        );
        let fallback = catalog.require(&config.routing.fallback_model)?.clone();
        Ok(Self::new(catalog, table, classifier, fallback))
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn is_auto(requested: &str) -> bool {
        requested.trim().eq_ignore_ascii_case(AUTO_MODEL)
    }

    /// Classify a message and look up its model.
    pub async fn classify(&self, message: &str) -> Route {
        let category = self.classifier.classify(message).await;
        let model = self.table.model_for(category).clone();
        info!(%category, model = %model.id, "Routed request");
        Route {
            model,
            category: Some(category),
        }
    }

    /// Resolve the model for a turn. Never fails: unknown explicit ids
    /// resolve to the fallback model.
    pub async fn route(&self, requested: &str, history: &[Message]) -> Route {
        if Self::is_auto(requested) {
            let last = last_user_index(history)
                .map(|i| history[i].content.as_str())
                .unwrap_or_default();
            return self.classify(last).await;
        }

        let model = match self.catalog.get(requested.trim()) {
            Some(model) => model.clone(),
            None => {
                warn!(requested, fallback = %self.fallback.id, "Unknown model requested, using fallback");
                self.fallback.clone()
            }
        };
        Route {
            model,
            category: None,
        }
    }
}
