//! Static model catalog and category → model table.

use std::collections::HashMap;
use switchboard_config::AppConfig;
use switchboard_core::model::ModelDescriptor;
use switchboard_core::routing::TaskCategory;

use crate::RouterError;

/// Every model the service may dispatch to, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    models: HashMap<String, ModelDescriptor>,
}

impl ModelCatalog {
    pub fn new(models: impl IntoIterator<Item = ModelDescriptor>) -> Self {
        Self {
            models: models.into_iter().map(|m| (m.id.clone(), m)).collect(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.models.iter().cloned())
    }

    pub fn get(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.get(id)
    }

    pub(crate) fn require(&self, id: &str) -> Result<&ModelDescriptor, RouterError> {
        self.get(id).ok_or_else(|| RouterError::UnknownModel(id.to_string()))
    }

    /// Model ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.models.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Maps each [`TaskCategory`] to exactly one model. Immutable once built.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    routes: HashMap<TaskCategory, ModelDescriptor>,
}

impl RoutingTable {
    /// Build from `(category, model id)` pairs. Every category must be
    /// covered and every model must exist in the catalog.
    pub fn build<'a>(
        catalog: &ModelCatalog,
        entries: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, RouterError> {
        let mut routes = HashMap::new();
        for (category, model_id) in entries {
            let category: TaskCategory = category.parse().map_err(RouterError::UnknownCategory)?;
            routes.insert(category, catalog.require(model_id)?.clone());
        }

        if let Some(missing) = TaskCategory::ALL.into_iter().find(|c| !routes.contains_key(c)) {
            return Err(RouterError::UncoveredCategory(missing));
        }

        Ok(Self { routes })
    }

    pub fn from_config(config: &AppConfig, catalog: &ModelCatalog) -> Result<Self, RouterError> {
        Self::build(
            catalog,
            config
                .routing
                .table
                .iter()
                .map(|(c, m)| (c.as_str(), m.as_str())),
        )
    }

    pub fn model_for(&self, category: TaskCategory) -> &ModelDescriptor {
        // Construction guarantees every category is present.
        &self.routes[&category]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_covers_every_category() {
        let config = AppConfig::default();
        let catalog = ModelCatalog::from_config(&config);
        let table = RoutingTable::from_config(&config, &catalog).unwrap();
        assert_eq!(table.model_for(TaskCategory::Simple).id, "gpt-5-nano");
        assert_eq!(table.model_for(TaskCategory::Coding).id, "claude-sonnet-4-5");
        assert_eq!(table.model_for(TaskCategory::Realtime).id, "sonar-pro");
    }

    #[test]
    fn rejects_unknown_model_and_missing_category() {
        let catalog = ModelCatalog::from_config(&AppConfig::default());

        let err = RoutingTable::build(&catalog, [("simple", "gpt-9")]).unwrap_err();
        assert!(matches!(err, RouterError::UnknownModel(id) if id == "gpt-9"));

        let err = RoutingTable::build(&catalog, [("simple", "gpt-5-nano")]).unwrap_err();
        assert!(matches!(err, RouterError::UncoveredCategory(TaskCategory::General)));

        let err = RoutingTable::build(&catalog, [("poetry", "gpt-5")]).unwrap_err();
        assert!(matches!(err, RouterError::UnknownCategory(_)));
    }

    #[test]
    fn catalog_ids_sorted() {
        let catalog = ModelCatalog::from_config(&AppConfig::default());
        let ids = catalog.ids();
        assert!(ids.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(ids.len(), catalog.len());
    }
}
