//! The chat turn pipeline.
//!
//! ```text
//! Gating ─▶ Routing ─▶ Enriching ─▶ Streaming ─▶ Finalizing ─▶ Done
//!    └──────────┴───────────┴────────────┴─────────────▶ Aborted
//! ```
//!
//! Each turn runs on its own task and talks to the client through a bounded
//! channel. A closed channel means the client left: the turn stops at its
//! next await, drops the provider stream, and writes neither usage nor
//! conversation. Credits reserved at gating are not returned. Usage of a
//! finished turn is recorded after its `Done` event.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use switchboard_core::error::ProviderError;
use switchboard_core::ledger::{Admission, AllowanceLedger};
use switchboard_core::message::Message;
use switchboard_core::store::ConversationStore;
use switchboard_enrich::{ContextAssembler, EnrichOptions};
use switchboard_providers::ProviderRegistry;
use switchboard_router::{IntentRouter, Route};
use switchboard_telemetry::{TurnUsage, UsageRecorder};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::TurnError;
use crate::events::ChatEvent;
use crate::request::ChatRequest;

/// Buffered events between a turn and its client.
pub const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Gating,
    Routing,
    Enriching,
    Streaming,
    Finalizing,
    Done,
    Aborted,
}

/// Coordinates ledger, router, enrichers, provider and recorder for each turn.
#[derive(Clone)]
pub struct ChatOrchestrator {
    ledger: Arc<dyn AllowanceLedger>,
    router: IntentRouter,
    assembler: ContextAssembler,
    providers: ProviderRegistry,
    conversations: Arc<dyn ConversationStore>,
    recorder: UsageRecorder,
    default_temperature: f32,
}

impl ChatOrchestrator {
    pub fn new(
        ledger: Arc<dyn AllowanceLedger>,
        router: IntentRouter,
        assembler: ContextAssembler,
        providers: ProviderRegistry,
        conversations: Arc<dyn ConversationStore>,
        recorder: UsageRecorder,
    ) -> Self {
        Self {
            ledger,
            router,
            assembler,
            providers,
            conversations,
            recorder,
            default_temperature: 0.7,
        }
    }

    pub fn with_default_temperature(mut self, temperature: f32) -> Self {
        self.default_temperature = temperature;
        self
    }

    /// Start a turn on a new task and return its event stream.
    pub fn start(&self, user_id: impl Into<String>, request: ChatRequest) -> mpsc::Receiver<ChatEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let this = self.clone();
        let user_id = user_id.into();
        tokio::spawn(async move { this.run(user_id, request, tx).await });
        rx
    }

    /// Drive one turn to completion, sending events to `tx`. Unless the
    /// client has gone, the last event sent is [`ChatEvent::Done`]. Usage
    /// is written after `Done`; `tx` is dropped, closing the stream, once
    /// it has been.
    pub async fn run(&self, user_id: String, request: ChatRequest, tx: mpsc::Sender<ChatEvent>) -> TurnState {
        let mut turn = Turn {
            user_id: &user_id,
            tx: &tx,
            state: TurnState::Gating,
        };

        match self.drive(&mut turn, &request).await {
            Ok(usage) => {
                turn.enter(TurnState::Done);
                let _ = tx.send(ChatEvent::Done).await;
                // Recorded after `Done`; the stream closes once this returns.
                self.recorder.record(usage).await;
            }
            Err(TurnError::Cancelled) => {
                info!(user_id = %user_id, at = ?turn.state, "Client disconnected, turn abandoned");
                turn.enter(TurnState::Aborted);
            }
            Err(TurnError::AllowanceExhausted) => {
                info!(user_id = %user_id, "Allowance exhausted");
                turn.enter(TurnState::Done);
                if let Some(message) = TurnError::AllowanceExhausted.user_message() {
                    let _ = tx.send(ChatEvent::Error { message }).await;
                }
                let _ = tx.send(ChatEvent::Done).await;
            }
            Err(e) => {
                warn!(user_id = %user_id, at = ?turn.state, error = %e, "Turn failed");
                turn.enter(TurnState::Aborted);
                if let Some(message) = e.user_message() {
                    let _ = tx.send(ChatEvent::Error { message }).await;
                }
                let _ = tx.send(ChatEvent::Done).await;
            }
        }
        turn.state
    }

    /// Run the turn up to its terminal event. Returns the usage to record
    /// once `Done` has been sent.
    async fn drive(&self, turn: &mut Turn<'_>, request: &ChatRequest) -> Result<TurnUsage, TurnError> {
        let user_id = turn.user_id;

        // ── Gating ──
        match turn.until_closed(self.ledger.reserve(user_id)).await?? {
            Admission::Granted => debug!(user_id, "Turn admitted"),
            Admission::Exhausted => return Err(TurnError::AllowanceExhausted),
        }
        turn.emit(ChatEvent::KeepAlive).await?;

        // ── Routing ──
        turn.enter(TurnState::Routing);
        let Route { model, category } = turn
            .until_closed(self.router.route(&request.model, &request.history))
            .await?;
        if let Some(category) = category {
            turn.emit(ChatEvent::Routing {
                category,
                model: model.id.clone(),
            })
            .await?;
        }

        // ── Enriching ──
        turn.enter(TurnState::Enriching);
        let options = EnrichOptions {
            search_web: request.search_web,
            search_docs: request.search_docs,
            project: request.project.clone(),
        };
        let enriched = turn
            .until_closed(self.assembler.assemble(user_id, &request.history, &options, Utc::now()))
            .await?;

        // ── Streaming ──
        turn.enter(TurnState::Streaming);
        let temperature = request.temperature.unwrap_or(self.default_temperature);
        let mut chunks = turn
            .until_closed(self.providers.stream(&model, temperature, enriched.messages.clone()))
            .await??;

        let mut reply = String::new();
        loop {
            let chunk = match turn.until_closed(chunks.recv()).await? {
                Some(chunk) => chunk?,
                None => {
                    return Err(ProviderError::StreamInterrupted("stream ended without completion".into()).into());
                }
            };
            if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
                reply.push_str(&text);
                turn.emit(ChatEvent::Delta { content: text }).await?;
            }
            if chunk.done {
                break;
            }
        }
        drop(chunks);

        // ── Finalizing ──
        turn.enter(TurnState::Finalizing);
        if reply.is_empty() {
            debug!(user_id, model = %model.id, "Empty reply, nothing to persist");
        } else {
            let mut conversation = request.history.clone();
            conversation.push(Message::assistant(reply.as_str()));
            if let Err(e) = self.conversations.save_conversation(user_id, &conversation).await {
                warn!(user_id, error = %e, "Failed to persist conversation");
            }
        }

        Ok(TurnUsage {
            user_id: user_id.to_string(),
            resolved_model: model.id,
            requested_model: request.model.clone(),
            category,
            input: enriched.messages,
            output: reply,
            web_search: enriched.web_search,
            documents: enriched.documents,
        })
    }
}

/// Per-turn state and the client channel.
struct Turn<'a> {
    user_id: &'a str,
    tx: &'a mpsc::Sender<ChatEvent>,
    state: TurnState,
}

impl Turn<'_> {
    fn enter(&mut self, next: TurnState) {
        debug!(user_id = self.user_id, from = ?self.state, to = ?next, "Turn state");
        self.state = next;
    }

    async fn emit(&self, event: ChatEvent) -> Result<(), TurnError> {
        self.tx.send(event).await.map_err(|_| TurnError::Cancelled)
    }

    /// Await `fut` unless the client disconnects first.
    async fn until_closed<F: Future>(&self, fut: F) -> Result<F::Output, TurnError> {
        tokio::select! {
            biased;
            _ = self.tx.closed() => Err(TurnError::Cancelled),
            out = fut => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use switchboard_config::AppConfig;
    use switchboard_core::error::LedgerError;
    use switchboard_core::ledger::Account;
    use switchboard_core::message::ProviderRole;
    use switchboard_core::model::ProviderFamily;
    use switchboard_core::provider::{ChunkStream, Provider, ProviderRequest, ProviderResponse, StreamChunk};
    use switchboard_core::error::StoreError;
    use switchboard_core::routing::TaskCategory;
    use switchboard_core::store::{MonthlyUsage, UsageRecord, UsageSink};
    use switchboard_store::InMemoryStore;
    use tokio::sync::Notify;
    use switchboard_telemetry::PricingTable;

    /// Classifies everything as `classification` and streams `deltas`.
    struct ScriptedProvider {
        classification: String,
        deltas: Vec<String>,
        pace: Option<Duration>,
        refuse: bool,
        fail_after: Option<usize>,
        streams: AtomicUsize,
        requests: Mutex<Vec<ProviderRequest>>,
        upstream_closed: Arc<AtomicBool>,
    }

    impl ScriptedProvider {
        fn new(classification: &str, deltas: &[&str]) -> Self {
            Self {
                classification: classification.into(),
                deltas: deltas.iter().map(|d| d.to_string()).collect(),
                pace: None,
                refuse: false,
                fail_after: None,
                streams: AtomicUsize::new(0),
                requests: Mutex::new(vec![]),
                upstream_closed: Arc::new(AtomicBool::new(false)),
            }
        }

        fn last_stream_request(&self) -> ProviderRequest {
            self.requests.lock().unwrap().iter().rev().find(|r| r.stream).cloned().unwrap()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            let model = request.model.clone();
            self.requests.lock().unwrap().push(request);
            Ok(ProviderResponse { content: self.classification.clone(), usage: None, model })
        }

        async fn stream(&self, request: ProviderRequest) -> Result<ChunkStream, ProviderError> {
            self.streams.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request);
            if self.refuse {
                return Err(ProviderError::ApiError { status_code: 500, message: "upstream down".into() });
            }

            let (tx, rx) = mpsc::channel(1);
            let deltas = self.deltas.clone();
            let pace = self.pace;
            let fail_after = self.fail_after;
            let closed = self.upstream_closed.clone();
            tokio::spawn(async move {
                for (i, delta) in deltas.into_iter().enumerate() {
                    if fail_after == Some(i) {
                        let _ = tx.send(Err(ProviderError::StreamInterrupted("connection reset".into()))).await;
                        return;
                    }
                    if let Some(pace) = pace {
                        tokio::time::sleep(pace).await;
                    }
                    if tx.send(Ok(StreamChunk::text(delta))).await.is_err() {
                        closed.store(true, Ordering::SeqCst);
                        return;
                    }
                }
                let _ = tx.send(Ok(StreamChunk::done())).await;
            });
            Ok(rx)
        }
    }

    struct Harness {
        orchestrator: ChatOrchestrator,
        store: InMemoryStore,
        provider: Arc<ScriptedProvider>,
    }

    fn harness_with(provider: ScriptedProvider, ledger: Option<Arc<dyn AllowanceLedger>>, grant: i64) -> Harness {
        harness_recording_to(provider, ledger, grant, None)
    }

    fn harness_recording_to(
        provider: ScriptedProvider,
        ledger: Option<Arc<dyn AllowanceLedger>>,
        grant: i64,
        usage: Option<Arc<dyn UsageSink>>,
    ) -> Harness {
        let provider = Arc::new(provider);
        let mut registry = ProviderRegistry::new();
        for family in ProviderFamily::all() {
            registry.register(family, provider.clone());
        }
        let config = AppConfig::default();
        let store = InMemoryStore::new(grant);
        let router = IntentRouter::from_config(&config, registry.clone()).unwrap();
        let sink = usage.unwrap_or_else(|| Arc::new(store.clone()));
        let recorder = UsageRecorder::new(sink, Arc::new(PricingTable::with_defaults()));
        let orchestrator = ChatOrchestrator::new(
            ledger.unwrap_or_else(|| Arc::new(store.clone())),
            router,
            ContextAssembler::new(),
            registry,
            Arc::new(store.clone()),
            recorder,
        );
        Harness { orchestrator, store, provider }
    }

    fn harness(provider: ScriptedProvider) -> Harness {
        harness_with(provider, None, 100)
    }

    async fn collect(h: &Harness, request: ChatRequest) -> (Vec<ChatEvent>, TurnState) {
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let state = h.orchestrator.run("alice".into(), request, tx).await;
        let mut events = vec![];
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        (events, state)
    }

    fn deltas(events: &[ChatEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                ChatEvent::Delta { content } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn auto_turn_routes_streams_and_records() {
        let h = harness(ScriptedProvider::new("simple", &["Paris", " is the capital."]));
        let request = ChatRequest::new(vec![Message::user("What is the capital of France?")]);
        let (events, state) = collect(&h, request).await;

        assert_eq!(state, TurnState::Done);
        assert_eq!(events[0], ChatEvent::KeepAlive);
        assert_eq!(
            events[1],
            ChatEvent::Routing { category: TaskCategory::Simple, model: "gpt-5-nano".into() }
        );
        assert_eq!(deltas(&events), "Paris is the capital.");
        assert_eq!(events.last(), Some(&ChatEvent::Done));

        let usage = h.store.usage_log().await;
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].resolved_model, "gpt-5-nano");
        assert_eq!(usage[0].requested_model, "auto");
        assert_eq!(usage[0].category, Some(TaskCategory::Simple));
        assert!(usage[0].cost_cents >= 1);

        let saved = h.store.load_conversation("alice").await.unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[1], Message::assistant("Paris is the capital."));
    }

    #[tokio::test]
    async fn explicit_model_skips_routing_and_fixes_temperature() {
        let h = harness(ScriptedProvider::new("coding", &["ok"]));
        let mut request = ChatRequest::new(vec![Message::user("hi")]).with_model("gpt-5");
        request.temperature = Some(0.2);
        let (events, _) = collect(&h, request).await;

        assert!(!events.iter().any(|e| matches!(e, ChatEvent::Routing { .. })));
        let sent = h.provider.last_stream_request();
        assert_eq!(sent.model, "gpt-5");
        assert_eq!(sent.temperature, 1.0);
        // No classifier call
        assert_eq!(h.provider.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn context_messages_reach_provider_as_user() {
        let h = harness(ScriptedProvider::new("general", &["done"]));
        let request = ChatRequest::new(vec![
            Message::context("Attached: quarterly numbers"),
            Message::user("Summarize the attachment"),
        ])
        .with_model("claude-sonnet-4-5");
        collect(&h, request).await;

        let sent = h.provider.last_stream_request();
        assert_eq!(sent.messages[0].role, ProviderRole::System);
        assert_eq!(sent.messages[1].role, ProviderRole::User);
        assert_eq!(sent.messages[1].content, "Attached: quarterly numbers");
        assert_eq!(sent.messages[2].content, "Summarize the attachment");
    }

    #[tokio::test]
    async fn exhausted_allowance_blocks_before_streaming() {
        let h = harness_with(ScriptedProvider::new("simple", &["hi"]), None, 1);
        let first = collect(&h, ChatRequest::new(vec![Message::user("one")])).await;
        assert_eq!(first.1, TurnState::Done);

        let (events, state) = collect(&h, ChatRequest::new(vec![Message::user("two")])).await;
        assert_eq!(state, TurnState::Done);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], ChatEvent::Error { message } if message.contains("credits")));
        assert_eq!(events[1], ChatEvent::Done);
        assert_eq!(h.provider.streams.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.usage_log().await.len(), 1);
    }

    /// Holds every write until `open` is notified.
    #[derive(Default)]
    struct GatedSink {
        open: Notify,
        records: Mutex<Vec<UsageRecord>>,
    }

    #[async_trait]
    impl UsageSink for GatedSink {
        async fn record_usage(&self, record: &UsageRecord) -> Result<(), StoreError> {
            self.open.notified().await;
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn monthly_usage(&self, _: &str) -> Result<Vec<MonthlyUsage>, StoreError> {
            Ok(vec![])
        }

        async fn recent_usage(&self, _: &str, _: usize) -> Result<Vec<UsageRecord>, StoreError> {
            Ok(self.records.lock().unwrap().clone())
        }
    }

    #[tokio::test]
    async fn done_is_not_held_back_by_usage_recording() {
        let sink = Arc::new(GatedSink::default());
        let h = harness_recording_to(ScriptedProvider::new("simple", &["ok"]), None, 100, Some(sink.clone()));
        let history = vec![Message::user("lorem ipsum dolor sit amet ".repeat(40_000))];

        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let orchestrator = h.orchestrator.clone();
        let turn = tokio::spawn(async move {
            orchestrator
                .run("alice".into(), ChatRequest::new(history).with_model("gpt-4o"), tx)
                .await
        });

        let mut events = vec![];
        while let Some(event) = rx.recv().await {
            let done = event == ChatEvent::Done;
            events.push(event);
            if done {
                break;
            }
        }
        assert_eq!(events.last(), Some(&ChatEvent::Done));
        assert!(sink.records.lock().unwrap().is_empty());

        sink.open.notify_one();
        assert_eq!(rx.recv().await, None);
        assert_eq!(turn.await.unwrap(), TurnState::Done);
        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].input_tokens > 40_000);
    }

    struct DownLedger;

    #[async_trait]
    impl AllowanceLedger for DownLedger {
        async fn reserve(&self, _: &str) -> Result<Admission, LedgerError> {
            Err(LedgerError::Unavailable("database is locked".into()))
        }
        async fn balance(&self, _: &str) -> Result<Option<Account>, LedgerError> {
            Err(LedgerError::Unavailable("database is locked".into()))
        }
        async fn grant(&self, _: &str, _: i64) -> Result<Account, LedgerError> {
            Err(LedgerError::Unavailable("database is locked".into()))
        }
        async fn set_unlimited(&self, _: &str, _: bool) -> Result<Account, LedgerError> {
            Err(LedgerError::Unavailable("database is locked".into()))
        }
    }

    #[tokio::test]
    async fn ledger_outage_is_unavailable_not_exhausted() {
        let h = harness_with(ScriptedProvider::new("simple", &["hi"]), Some(Arc::new(DownLedger)), 100);
        let (events, _) = collect(&h, ChatRequest::new(vec![Message::user("hi")])).await;

        assert!(matches!(&events[0], ChatEvent::Error { message } if message.contains("unavailable")));
        assert_eq!(events.last(), Some(&ChatEvent::Done));
        assert_eq!(h.provider.streams.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn provider_refusal_keeps_charge_and_records_nothing() {
        let mut provider = ScriptedProvider::new("simple", &[]);
        provider.refuse = true;
        let h = harness(provider);
        let (events, state) = collect(&h, ChatRequest::new(vec![Message::user("hi")])).await;

        assert_eq!(state, TurnState::Aborted);
        assert_eq!(events[0], ChatEvent::KeepAlive);
        assert!(matches!(events[events.len() - 2], ChatEvent::Error { .. }));
        assert_eq!(events.last(), Some(&ChatEvent::Done));
        assert!(h.store.usage_log().await.is_empty());
        assert!(h.store.load_conversation("alice").await.unwrap().is_empty());
        assert_eq!(h.store.balance("alice").await.unwrap().unwrap().credits_used, 1);
    }

    #[tokio::test]
    async fn mid_stream_failure_trails_an_error() {
        let mut provider = ScriptedProvider::new("simple", &["a", "b", "c", "d"]);
        provider.fail_after = Some(2);
        let h = harness(provider);
        let (events, _) = collect(&h, ChatRequest::new(vec![Message::user("hi")]).with_model("gpt-4o")).await;

        assert_eq!(deltas(&events), "ab");
        assert!(matches!(events[events.len() - 2], ChatEvent::Error { .. }));
        assert_eq!(events.last(), Some(&ChatEvent::Done));
        assert!(h.store.usage_log().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_three_deltas_records_nothing() {
        let words: Vec<String> = (0..20).map(|i| format!("w{i} ")).collect();
        let words: Vec<&str> = words.iter().map(String::as_str).collect();
        let mut provider = ScriptedProvider::new("simple", &words);
        provider.pace = Some(Duration::from_millis(10));
        let h = harness(provider);

        let (tx, mut rx) = mpsc::channel(1);
        let orchestrator = h.orchestrator.clone();
        let turn = tokio::spawn(async move {
            orchestrator
                .run("alice".into(), ChatRequest::new(vec![Message::user("count")]).with_model("gpt-4o"), tx)
                .await
        });

        let mut seen = 0;
        while let Some(event) = rx.recv().await {
            if matches!(event, ChatEvent::Delta { .. }) {
                seen += 1;
                if seen == 3 {
                    break;
                }
            }
        }
        drop(rx);

        assert_eq!(turn.await.unwrap(), TurnState::Aborted);
        // Let the provider task observe the dropped stream
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.provider.upstream_closed.load(Ordering::SeqCst));
        assert!(h.store.usage_log().await.is_empty());
        assert!(h.store.load_conversation("alice").await.unwrap().is_empty());
        assert_eq!(h.store.balance("alice").await.unwrap().unwrap().credits_used, 1);
    }
}
