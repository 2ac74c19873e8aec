//! Intent classification - one short completion call to an auxiliary model.

use switchboard_core::message::Message;
use switchboard_core::model::ModelDescriptor;
use switchboard_core::routing::{CLASSIFIER_TEMPERATURE, TaskCategory};
use switchboard_providers::ProviderRegistry;
use tracing::{debug, warn};

const CLASSIFIER_PROMPT: &str = "\
You are a request classifier. Read the user's message and answer with exactly \
one word: the category that best describes the task.

Categories:
- simple: greetings, small talk, short factual lookups with a one-line answer
- general: everyday questions, explanations, advice, anything not covered below
- coding: writing, reviewing, debugging or refactoring code; shell commands; APIs
- writing: essays, stories, emails, editing or rewriting prose
- analysis: comparing options, reasoning through trade-offs, data interpretation
- science: mathematics, physics, chemistry, biology, formal proofs
- realtime: anything that depends on current events, prices, weather or today's news

Rules:
- If the message mentions code, a function, a stack trace or a programming language, answer coding.
- If the answer would change from day to day, answer realtime.
- If torn between simple and general, answer simple.
- If torn between general and analysis, answer general.

Answer with the category word only.";

/// Classifies the latest user message into a [`TaskCategory`].
#[derive(Clone)]
pub struct IntentClassifier {
    registry: ProviderRegistry,
    model: ModelDescriptor,
    max_tokens: u32,
}

impl IntentClassifier {
    pub fn new(registry: ProviderRegistry, model: ModelDescriptor, max_tokens: u32) -> Self {
        Self {
            registry,
            model,
            max_tokens,
        }
    }

    pub fn model(&self) -> &ModelDescriptor {
        &self.model
    }

    /// Classify `message`. Never fails: a provider error or an answer with
    /// no recognizable category yields [`TaskCategory::General`].
    pub async fn classify(&self, message: &str) -> TaskCategory {
        if message.trim().is_empty() {
            return TaskCategory::General;
        }

        let messages = vec![Message::system(CLASSIFIER_PROMPT), Message::user(message)];
        let response = match self
            .registry
            .complete(&self.model, CLASSIFIER_TEMPERATURE, messages, self.max_tokens)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(model = %self.model.id, error = %e, "Classifier call failed, routing as general");
                return TaskCategory::General;
            }
        };

        match parse_category(&response.content) {
            Some(category) => {
                debug!(%category, raw = %response.content.trim(), "Classified request");
                category
            }
            None => {
                warn!(raw = %response.content.trim(), "Classifier answer had no category, routing as general");
                TaskCategory::General
            }
        }
    }
}

/// Find the category named earliest in the classifier's answer.
pub fn parse_category(output: &str) -> Option<TaskCategory> {
    let lower = output.to_lowercase();
    TaskCategory::ALL
        .into_iter()
        .filter_map(|c| lower.find(c.as_str()).map(|pos| (pos, c)))
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, c)| c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use switchboard_core::error::ProviderError;
    use switchboard_core::model::ProviderFamily;
    use switchboard_core::provider::{Provider, ProviderRequest, ProviderResponse};

    /// Answers by keyword so tests can pin the classifier's behavior.
    struct KeywordClassifier {
        seen: Mutex<Vec<ProviderRequest>>,
    }

    #[async_trait]
    impl Provider for KeywordClassifier {
        fn name(&self) -> &str {
            "keyword"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            let question = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            self.seen.lock().unwrap().push(request.clone());
            let answer = if question.contains("capital") {
                "simple"
            } else if question.contains("race condition") {
                "Coding."
            } else if question.contains("boom") {
                return Err(ProviderError::Network("connection reset".into()));
            } else {
                "I am not sure"
            };
            Ok(ProviderResponse { content: answer.into(), usage: None, model: request.model })
        }
    }

    fn classifier() -> (IntentClassifier, Arc<KeywordClassifier>) {
        let provider = Arc::new(KeywordClassifier { seen: Mutex::new(vec![]) });
        let registry = ProviderRegistry::new().with(ProviderFamily::OpenAi, provider.clone());
        let model = ModelDescriptor::new("gpt-4o-mini", ProviderFamily::OpenAi);
        (IntentClassifier::new(registry, model, 10), provider)
    }

    #[test]
    fn first_category_in_output_wins() {
        assert_eq!(parse_category("coding"), Some(TaskCategory::Coding));
        assert_eq!(parse_category("  Writing\n"), Some(TaskCategory::Writing));
        assert_eq!(parse_category("analysis, or maybe general"), Some(TaskCategory::Analysis));
        assert_eq!(parse_category("general, or maybe analysis"), Some(TaskCategory::General));
        assert_eq!(parse_category("no idea"), None);
    }

    #[tokio::test]
    async fn classifies_examples() {
        let (c, _) = classifier();
        assert_eq!(c.classify("What is the capital of France?").await, TaskCategory::Simple);
        assert_eq!(
            c.classify("Refactor this function to avoid the race condition").await,
            TaskCategory::Coding
        );
    }

    #[tokio::test]
    async fn calls_at_zero_temperature_with_small_ceiling() {
        let (c, provider) = classifier();
        c.classify("What is the capital of France?").await;
        c.classify("What is the capital of France?").await;

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        for request in seen.iter() {
            assert_eq!(request.temperature, 0.0);
            assert_eq!(request.max_tokens, Some(10));
            assert!(!request.stream);
        }
        assert_eq!(seen[0].messages, seen[1].messages);
    }

    #[tokio::test]
    async fn failures_fall_back_to_general() {
        let (c, provider) = classifier();
        assert_eq!(c.classify("boom").await, TaskCategory::General);
        assert_eq!(c.classify("tell me something").await, TaskCategory::General);
        assert_eq!(c.classify("   ").await, TaskCategory::General);
        assert_eq!(provider.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unconfigured_provider_falls_back_to_general() {
        let model = ModelDescriptor::new("gpt-4o-mini", ProviderFamily::OpenAi);
        let c = IntentClassifier::new(ProviderRegistry::new(), model, 10);
        assert_eq!(c.classify("What is the capital of France?").await, TaskCategory::General);
    }
}
