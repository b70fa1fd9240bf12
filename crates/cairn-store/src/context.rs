//! Context store: per-session state with expiry
//!
//! Contexts are stored as hashes, stage snapshots and execution records as
//! JSON strings, and metrics as a sorted set keyed by timestamp. Each key has
//! its own TTL and is written independently.

use cairn_core::fail_open::fail_open;
use cairn_core::{
    CairnError, Metrics, Result, SessionContext, Stage, StoreConfig, WorkflowExecution,
    PREVIOUS_VERSIONS_KEY,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::backend::KvBackend;
use crate::keys::{self, fields};
use crate::observer::{ContextEvent, ContextEventKind, ContextObserver};

/// Options for [`ContextStore::update`] and [`ContextStore::advance_stage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Fold the superseded values into `metadata.previousVersions`
    pub preserve_history: bool,
    /// Check the patched context before writing it
    pub validate_schema: bool,
    /// Append the patch's metrics to the session's metrics history
    pub update_metrics: bool,
    /// Notify subscribers once the write succeeds
    pub notify_subscribers: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            preserve_history: false,
            validate_schema: true,
            update_metrics: false,
            notify_subscribers: true,
        }
    }
}

impl UpdateOptions {
    pub fn preserving_history(mut self, preserve: bool) -> Self {
        self.preserve_history = preserve;
        self
    }

    pub fn with_metrics(mut self) -> Self {
        self.update_metrics = true;
        self
    }

    pub fn silent(mut self) -> Self {
        self.notify_subscribers = false;
        self
    }
}

/// Partial update applied by [`ContextStore::update`]
#[derive(Debug, Clone, Default)]
pub struct ContextPatch {
    pub previous_output: Option<Value>,
    pub current_input: Option<Value>,
    /// Merged into the existing metadata key by key
    pub metadata: serde_json::Map<String, Value>,
    pub metrics: Option<Metrics>,
}

impl ContextPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn previous_output(mut self, output: Value) -> Self {
        self.previous_output = Some(output);
        self
    }

    pub fn current_input(mut self, input: Value) -> Self {
        self.current_input = Some(input);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// One point of a session's metrics history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsEntry {
    pub stage: Stage,
    pub metrics: Metrics,
}

type Subscribers = HashMap<String, Vec<(String, Arc<dyn ContextObserver>)>>;

/// Durable, expiring per-session store
pub struct ContextStore<B: KvBackend> {
    backend: B,
    config: StoreConfig,
    subscribers: RwLock<Subscribers>,
}

impl<B: KvBackend> ContextStore<B> {
    pub fn new(backend: B, config: StoreConfig) -> Self {
        Self {
            backend,
            config,
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Create a fresh context at the first stage
    #[instrument(skip(self, input))]
    pub async fn create(&self, session_id: &str, input: Option<Value>) -> Result<SessionContext> {
        let mut context = SessionContext::new(session_id);
        context.current_input = input;
        Self::check_schema(&context)?;

        let created = self
            .backend
            .hset_nx_ex(
                &keys::context(session_id),
                Self::encode_context(&context)?,
                self.config.context_ttl(),
            )
            .await?;
        if !created {
            return Err(CairnError::SessionExists(session_id.to_string()));
        }

        debug!(session_id, "Created context");
        Ok(context)
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<SessionContext>> {
        let hash = self.backend.hgetall(&keys::context(session_id)).await?;
        Self::decode_context(session_id, hash)
    }

    /// Apply a patch to an existing context
    #[instrument(skip(self, patch))]
    pub async fn update(
        &self,
        session_id: &str,
        patch: ContextPatch,
        options: UpdateOptions,
    ) -> Result<SessionContext> {
        let mut context = self
            .get(session_id)
            .await?
            .ok_or_else(|| CairnError::NotFound(format!("context for session {}", session_id)))?;

        if options.preserve_history {
            context.push_version();
        }

        let ContextPatch {
            previous_output,
            current_input,
            metadata,
            metrics,
        } = patch;

        if let Some(output) = previous_output {
            context.previous_output = Some(output);
        }
        if let Some(input) = current_input {
            context.current_input = Some(input);
        }
        context.metadata.extend(metadata);
        context.timestamp = Utc::now();

        if options.validate_schema {
            Self::check_schema(&context)?;
        }

        self.write_context(&context).await?;

        if options.update_metrics {
            if let Some(metrics) = &metrics {
                fail_open("context_metrics", || {
                    self.record_metrics(session_id, context.stage, metrics)
                })
                .await;
            }
        }

        if options.notify_subscribers {
            self.notify(ContextEvent {
                kind: ContextEventKind::Updated,
                context: context.clone(),
            })
            .await;
        }

        Ok(context)
    }

    /// Delete a context and drop its subscribers
    pub async fn delete(&self, session_id: &str) -> Result<bool> {
        let removed = self.backend.del(&[keys::context(session_id)]).await?;
        self.subscribers.write().await.remove(session_id);
        Ok(removed > 0)
    }

    /// Move the context to `next`, carrying `output` forward
    ///
    /// Only `current + 1` or a restart at the first stage is accepted.
    #[instrument(skip(self, output))]
    pub async fn advance_stage(
        &self,
        session_id: &str,
        next: Stage,
        output: Value,
        options: UpdateOptions,
    ) -> Result<SessionContext> {
        let mut context = self
            .get(session_id)
            .await?
            .ok_or_else(|| CairnError::NotFound(format!("context for session {}", session_id)))?;

        let from = context.stage;
        if !from.can_advance_to(next) {
            return Err(CairnError::InvalidTransition { from, to: next });
        }

        if options.preserve_history {
            context.push_version();
        }

        context.stage = next;
        context.previous_output = Some(output.clone());
        context.current_input = Some(output);
        context.timestamp = Utc::now();

        if options.validate_schema {
            Self::check_schema(&context)?;
        }

        self.write_context(&context).await?;
        debug!(session_id, %from, to = %next, "Advanced context");

        if options.notify_subscribers {
            self.notify(ContextEvent {
                kind: ContextEventKind::Advanced { from, to: next },
                context: context.clone(),
            })
            .await;
        }

        Ok(context)
    }

    /// Register an observer; re-using a subscriber id replaces the observer
    pub async fn subscribe(
        &self,
        session_id: &str,
        subscriber_id: &str,
        observer: Arc<dyn ContextObserver>,
    ) {
        let mut subscribers = self.subscribers.write().await;
        let list = subscribers.entry(session_id.to_string()).or_default();
        list.retain(|(id, _)| id != subscriber_id);
        list.push((subscriber_id.to_string(), observer));
    }

    pub async fn unsubscribe(&self, session_id: &str, subscriber_id: &str) -> bool {
        let mut subscribers = self.subscribers.write().await;
        let Some(list) = subscribers.get_mut(session_id) else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| id != subscriber_id);
        let removed = list.len() < before;
        if list.is_empty() {
            subscribers.remove(session_id);
        }
        removed
    }

    pub async fn subscriber_count(&self, session_id: &str) -> usize {
        self.subscribers
            .read()
            .await
            .get(session_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Fetch many contexts in one pipelined round trip, in request order
    pub async fn batch_get(&self, session_ids: &[String]) -> Result<Vec<Option<SessionContext>>> {
        let context_keys: Vec<String> = session_ids.iter().map(|id| keys::context(id)).collect();
        let hashes = self.backend.hgetall_many(&context_keys).await?;
        session_ids
            .iter()
            .zip(hashes)
            .map(|(id, hash)| Self::decode_context(id, hash))
            .collect()
    }

    // Stage snapshots

    pub async fn put_stage_snapshot<T: Serialize>(
        &self,
        session_id: &str,
        stage: Stage,
        snapshot: &T,
    ) -> Result<()> {
        let value = serde_json::to_string(snapshot)?;
        self.backend
            .set(
                &keys::stage_result(session_id, stage),
                value,
                Some(self.config.stage_result_ttl()),
            )
            .await
    }

    pub async fn get_stage_snapshot<T: DeserializeOwned>(
        &self,
        session_id: &str,
        stage: Stage,
    ) -> Result<Option<T>> {
        match self
            .backend
            .get(&keys::stage_result(session_id, stage))
            .await?
        {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Delete every stage-scoped key of a session
    pub async fn delete_stage_snapshots(&self, session_id: &str) -> Result<usize> {
        self.backend
            .del(&keys::all_stage_results(session_id))
            .await
    }

    // Execution records

    pub async fn put_execution(&self, execution: &WorkflowExecution) -> Result<()> {
        let value = serde_json::to_string(execution)?;
        self.backend
            .set(
                &keys::execution(&execution.session_id),
                value,
                Some(self.config.execution_ttl()),
            )
            .await
    }

    pub async fn get_execution(&self, session_id: &str) -> Result<Option<WorkflowExecution>> {
        match self.backend.get(&keys::execution(session_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn delete_execution(&self, session_id: &str) -> Result<bool> {
        Ok(self.backend.del(&[keys::execution(session_id)]).await? > 0)
    }

    // Metrics history

    /// Append metrics to the session's time-ordered history
    pub async fn record_metrics(&self, session_id: &str, stage: Stage, metrics: &Metrics) -> Result<()> {
        let key = keys::metrics(session_id);
        let member = serde_json::to_string(&MetricsEntry {
            stage,
            metrics: metrics.clone(),
        })?;
        let score = metrics.timestamp.timestamp_millis() as f64;
        self.backend.zadd(&key, score, member).await?;
        self.backend
            .expire(&key, self.config.metrics_ttl())
            .await?;
        Ok(())
    }

    /// Metrics history, optionally starting at `since`, oldest first
    pub async fn metrics_history(
        &self,
        session_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<MetricsEntry>> {
        let min = since
            .map(|t| t.timestamp_millis() as f64)
            .unwrap_or(f64::NEG_INFINITY);
        let members = self
            .backend
            .zrange_by_score(&keys::metrics(session_id), min, f64::INFINITY)
            .await?;
        members
            .into_iter()
            .map(|(member, _)| serde_json::from_str(&member).map_err(CairnError::from))
            .collect()
    }

    // Internals

    async fn write_context(&self, context: &SessionContext) -> Result<()> {
        let key = keys::context(&context.session_id);
        self.backend
            .hset_ex(&key, Self::encode_context(context)?, self.config.context_ttl())
            .await
    }

    async fn notify(&self, event: ContextEvent) {
        let subscribers = self.subscribers.read().await;
        if let Some(list) = subscribers.get(&event.context.session_id) {
            for (id, observer) in list {
                debug!(subscriber = %id, session_id = %event.context.session_id, "Notifying subscriber");
                observer.on_context_event(&event);
            }
        }
    }

    fn check_schema(context: &SessionContext) -> Result<()> {
        if context.session_id.trim().is_empty() {
            return Err(CairnError::ValidationMessage(
                "session id must not be empty".to_string(),
            ));
        }
        if context.metadata.keys().any(|k| k.is_empty()) {
            return Err(CairnError::ValidationMessage(
                "metadata keys must not be empty".to_string(),
            ));
        }
        if let Some(versions) = context.metadata.get(PREVIOUS_VERSIONS_KEY) {
            if !versions.is_array() {
                return Err(CairnError::ValidationMessage(format!(
                    "metadata.{} must be an array",
                    PREVIOUS_VERSIONS_KEY
                )));
            }
        }
        Ok(())
    }

    fn encode_context(context: &SessionContext) -> Result<Vec<(String, String)>> {
        Ok(vec![
            (fields::SESSION_ID.to_string(), context.session_id.clone()),
            (fields::STAGE.to_string(), context.stage.to_string()),
            (
                fields::PREVIOUS_OUTPUT.to_string(),
                serde_json::to_string(&context.previous_output)?,
            ),
            (
                fields::CURRENT_INPUT.to_string(),
                serde_json::to_string(&context.current_input)?,
            ),
            (
                fields::METADATA.to_string(),
                serde_json::to_string(&context.metadata)?,
            ),
            (fields::TIMESTAMP.to_string(), context.timestamp.to_rfc3339()),
        ])
    }

    fn decode_context(
        session_id: &str,
        mut hash: HashMap<String, String>,
    ) -> Result<Option<SessionContext>> {
        if hash.is_empty() {
            return Ok(None);
        }

        let mut take = |field: &str| {
            hash.remove(field).ok_or_else(|| {
                CairnError::Store(format!(
                    "context for session {} is missing field {}",
                    session_id, field
                ))
            })
        };

        let stored_id = take(fields::SESSION_ID)?;
        let stage = take(fields::STAGE)?.parse::<Stage>()?;
        let previous_output: Option<Value> = serde_json::from_str(&take(fields::PREVIOUS_OUTPUT)?)?;
        let current_input: Option<Value> = serde_json::from_str(&take(fields::CURRENT_INPUT)?)?;
        let metadata: serde_json::Map<String, Value> =
            serde_json::from_str(&take(fields::METADATA)?)?;
        let timestamp = DateTime::parse_from_rfc3339(&take(fields::TIMESTAMP)?)
            .map_err(|e| CairnError::Store(format!("bad context timestamp: {}", e)))?
            .with_timezone(&Utc);

        Ok(Some(SessionContext {
            session_id: stored_id,
            stage,
            previous_output,
            current_input,
            metadata,
            timestamp,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use crate::observer::ChannelObserver;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn store() -> ContextStore<MemoryBackend> {
        ContextStore::new(MemoryBackend::new(), StoreConfig::default())
    }

    struct CountingObserver(AtomicUsize);

    impl ContextObserver for CountingObserver {
        fn on_context_event(&self, _event: &ContextEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = store();
        let created = store
            .create("s1", Some(json!({"idea": "todo app"})))
            .await
            .unwrap();
        assert_eq!(created.stage, Stage::Ambiguity);

        let loaded = store.get("s1").await.unwrap().unwrap();
        assert_eq!(loaded.session_id, "s1");
        assert_eq!(loaded.current_input, Some(json!({"idea": "todo app"})));
        assert_eq!(loaded.previous_output, None);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let store = store();
        store.create("s1", None).await.unwrap();
        let err = store.create("s1", None).await.unwrap_err();
        assert!(matches!(err, CairnError::SessionExists(_)));
    }

    #[tokio::test]
    async fn test_concurrent_create_has_one_winner() {
        let store = store();
        let (first, second) = tokio::join!(
            store.create("s1", Some(json!("first"))),
            store.create("s1", Some(json!("second")))
        );

        let winner = match (first, second) {
            (Ok(ctx), Err(CairnError::SessionExists(_))) => ctx,
            (Err(CairnError::SessionExists(_)), Ok(ctx)) => ctx,
            other => panic!("expected exactly one create to succeed, got {:?}", other),
        };
        let stored = store.get("s1").await.unwrap().unwrap();
        assert_eq!(stored.current_input, winner.current_input);
    }

    #[tokio::test(start_paused = true)]
    async fn test_created_context_carries_ttl() {
        let store = store();
        store.create("s1", None).await.unwrap();
        assert_eq!(
            store.backend().ttl(&keys::context("s1")).await,
            Some(store.config().context_ttl())
        );
    }

    #[tokio::test]
    async fn test_update_missing_session() {
        let store = store();
        let err = store
            .update("ghost", ContextPatch::new(), UpdateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CairnError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_preserves_history() {
        let store = store();
        store.create("s1", Some(json!("first"))).await.unwrap();

        let updated = store
            .update(
                "s1",
                ContextPatch::new()
                    .current_input(json!("second"))
                    .metadata("owner", json!("team-a")),
                UpdateOptions::default().preserving_history(true),
            )
            .await
            .unwrap();

        assert_eq!(updated.current_input, Some(json!("second")));
        assert_eq!(updated.metadata["owner"], json!("team-a"));
        assert_eq!(updated.previous_versions().len(), 1);
        assert_eq!(updated.previous_versions()[0]["currentInput"], json!("first"));

        let reloaded = store.get("s1").await.unwrap().unwrap();
        assert_eq!(reloaded.previous_versions().len(), 1);
    }

    #[tokio::test]
    async fn test_update_rejects_bad_schema() {
        let store = store();
        store.create("s1", None).await.unwrap();
        let err = store
            .update(
                "s1",
                ContextPatch::new().metadata(PREVIOUS_VERSIONS_KEY, json!("oops")),
                UpdateOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CairnError::ValidationMessage(_)));

        // Nothing was written
        let ctx = store.get("s1").await.unwrap().unwrap();
        assert!(ctx.metadata.is_empty());
    }

    #[tokio::test]
    async fn test_advance_stage_guard() {
        let store = store();
        store.create("s1", None).await.unwrap();

        let ctx = store
            .advance_stage("s1", Stage::Specification, json!("spec"), UpdateOptions::default())
            .await
            .unwrap();
        assert_eq!(ctx.stage, Stage::Specification);
        assert_eq!(ctx.previous_output, Some(json!("spec")));

        let err = store
            .advance_stage("s1", Stage::Tasking, json!("skip"), UpdateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CairnError::InvalidTransition {
                from: Stage::Specification,
                to: Stage::Tasking
            }
        ));
        assert_eq!(store.get("s1").await.unwrap().unwrap().stage, Stage::Specification);

        let ctx = store
            .advance_stage("s1", Stage::Ambiguity, json!("restart"), UpdateOptions::default())
            .await
            .unwrap();
        assert_eq!(ctx.stage, Stage::Ambiguity);
    }

    #[tokio::test]
    async fn test_advance_missing_session() {
        let store = store();
        let err = store
            .advance_stage("ghost", Stage::Ambiguity, json!(null), UpdateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CairnError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_subscribers_notified_once_per_update() {
        let store = store();
        store.create("s1", None).await.unwrap();

        let observer = Arc::new(CountingObserver(AtomicUsize::new(0)));
        store.subscribe("s1", "counter", observer.clone()).await;
        // Re-subscribing with the same id must not double deliveries
        store.subscribe("s1", "counter", observer.clone()).await;
        assert_eq!(store.subscriber_count("s1").await, 1);

        store
            .update("s1", ContextPatch::new(), UpdateOptions::default())
            .await
            .unwrap();
        assert_eq!(observer.0.load(Ordering::SeqCst), 1);

        store
            .update("s1", ContextPatch::new(), UpdateOptions::default().silent())
            .await
            .unwrap();
        assert_eq!(observer.0.load(Ordering::SeqCst), 1);

        assert!(store.unsubscribe("s1", "counter").await);
        assert!(!store.unsubscribe("s1", "counter").await);
        store
            .update("s1", ContextPatch::new(), UpdateOptions::default())
            .await
            .unwrap();
        assert_eq!(observer.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_channel_observer_sees_advance() {
        let store = store();
        store.create("s1", None).await.unwrap();
        let (observer, mut rx) = ChannelObserver::new(4);
        store.subscribe("s1", "channel", Arc::new(observer)).await;

        store
            .advance_stage("s1", Stage::Specification, json!("x"), UpdateOptions::default())
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event.kind,
            ContextEventKind::Advanced {
                from: Stage::Ambiguity,
                to: Stage::Specification
            }
        );
    }

    #[tokio::test]
    async fn test_batch_get_keeps_order() {
        let store = store();
        store.create("a", Some(json!(1))).await.unwrap();
        store.create("c", Some(json!(3))).await.unwrap();

        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let contexts = store.batch_get(&ids).await.unwrap();
        assert_eq!(contexts.len(), 3);
        assert_eq!(contexts[0].as_ref().unwrap().current_input, Some(json!(1)));
        assert!(contexts[1].is_none());
        assert_eq!(contexts[2].as_ref().unwrap().session_id, "c");
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_expires() {
        let config = StoreConfig {
            context_ttl_secs: 60,
            ..StoreConfig::default()
        };
        let store = ContextStore::new(MemoryBackend::new(), config);
        store.create("s1", None).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(store.get("s1").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get("s1").await.unwrap().is_none());
        // An expired session can be created again
        store.create("s1", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_snapshots_and_execution() {
        let store = store();
        store
            .put_stage_snapshot("s1", Stage::Planning, &json!({"output": "plan"}))
            .await
            .unwrap();
        let snapshot: Option<Value> = store.get_stage_snapshot("s1", Stage::Planning).await.unwrap();
        assert_eq!(snapshot, Some(json!({"output": "plan"})));
        assert!(store
            .backend()
            .ttl(&keys::stage_result("s1", Stage::Planning))
            .await
            .is_some());

        let execution = WorkflowExecution::new("s1");
        store.put_execution(&execution).await.unwrap();
        assert_eq!(store.get_execution("s1").await.unwrap(), Some(execution));

        assert_eq!(store.delete_stage_snapshots("s1").await.unwrap(), 1);
        assert!(store.delete_execution("s1").await.unwrap());
        assert!(store.get_execution("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_metrics_history_and_update_metrics() {
        let store = store();
        store.create("s1", None).await.unwrap();

        store
            .update(
                "s1",
                ContextPatch::new().metrics(Metrics::uniform(0.9)),
                UpdateOptions::default().with_metrics(),
            )
            .await
            .unwrap();
        store
            .record_metrics("s1", Stage::Specification, &Metrics::uniform(0.5))
            .await
            .unwrap();

        let history = store.metrics_history("s1", None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].stage, Stage::Ambiguity);
    }

    #[tokio::test]
    async fn test_metrics_write_failure_is_advisory() {
        let backend = MemoryBackend::new().with_failing_prefix("cairn:metrics:");
        let store = ContextStore::new(backend, StoreConfig::default());
        store.create("s1", None).await.unwrap();

        let updated = store
            .update(
                "s1",
                ContextPatch::new()
                    .metadata("k", json!(true))
                    .metrics(Metrics::uniform(0.9)),
                UpdateOptions::default().with_metrics(),
            )
            .await
            .unwrap();
        assert_eq!(updated.metadata["k"], json!(true));
        assert!(store.metrics_history("s1", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = store();
        store.create("s1", None).await.unwrap();
        assert!(store.delete("s1").await.unwrap());
        assert!(!store.delete("s1").await.unwrap());
        assert!(store.get("s1").await.unwrap().is_none());
    }
}
