//! Runtime - 推論リクエストの入口
//!
//! # フロー
//! 1. task を parse（未知なら I/O の前に UnsupportedTask）
//! 2. content hash と parameters を検証
//! 3. request_timeout の中で ModelCache → InferenceDispatcher
//! 4. request_id と経過時間を付けてレスポンスにする

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{Instrument, info, info_span, warn};

use crate::cache::ModelCache;
use crate::domain::{
    ContentHash, ErrorEnvelope, HoardError, InferenceParameters, InferenceRequest, InferenceResponse,
    TaskKind,
};
use crate::inference::InferenceDispatcher;
use crate::ports::IdGenerator;

/// Runtime は ModelCache と InferenceDispatcher を束ねる
pub struct Runtime {
    cache: Arc<ModelCache>,
    dispatcher: InferenceDispatcher,
    ids: Arc<dyn IdGenerator>,
    request_timeout: Duration,
}

impl Runtime {
    pub fn new(cache: Arc<ModelCache>, ids: Arc<dyn IdGenerator>, request_timeout: Duration) -> Self {
        Self {
            cache,
            dispatcher: InferenceDispatcher::new(),
            ids,
            request_timeout,
        }
    }

    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    pub async fn infer(&self, request: InferenceRequest) -> Result<InferenceResponse, HoardError> {
        let started = Instant::now();
        let InferenceRequest {
            content_hash,
            task,
            input,
            parameters,
        } = request;

        let task: TaskKind = task.parse()?;
        let hash = ContentHash::parse(content_hash)?;
        let params = InferenceParameters::parse(task, &parameters)?;
        let request_id = self.ids.generate_request_id();

        let span = info_span!("infer", %request_id, %hash, %task);
        let work = async {
            let handle = self.cache.get_or_load(&hash, task).await?;
            self.dispatcher.run(handle, input, params.clone()).await
        };

        let outcome = match tokio::time::timeout(self.request_timeout, work.instrument(span)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(%request_id, %hash, %task, timeout = ?self.request_timeout, "inference request timed out");
                return Err(HoardError::Timeout(self.request_timeout));
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(%request_id, %hash, %task, elapsed_ms, "inference completed");

        Ok(InferenceResponse {
            request_id,
            content_hash: hash.to_string(),
            task,
            outcome,
            parameters_used: params,
            elapsed_ms,
        })
    }

    /// 失敗を ErrorEnvelope にして返す版
    pub async fn handle(&self, request: InferenceRequest) -> Result<InferenceResponse, ErrorEnvelope> {
        self.infer(request).await.map_err(|err| {
            warn!(status = ?err.status(), error = %err, "inference request failed");
            err.to_envelope()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::cache::CachePolicy;
    use crate::domain::{InferenceInput, InferenceOutcome, StatusClass, TextGenerationParams};
    use crate::impls::MemoryEventSink;
    use crate::ports::{FixedClock, UlidGenerator};
    use crate::testing::{FakeBackend, StubStore, fixed_time};

    struct Fixture {
        store: Arc<StubStore>,
        backend: Arc<FakeBackend>,
        runtime: Runtime,
    }

    fn fixture(request_timeout: Duration) -> Fixture {
        let store = Arc::new(StubStore::new());
        let backend = Arc::new(FakeBackend::new());
        let clock = Arc::new(FixedClock::new(fixed_time()));
        let cache = Arc::new(ModelCache::new(
            store.clone(),
            backend.clone(),
            clock.clone(),
            Arc::new(MemoryEventSink::new()),
            CachePolicy::default(),
        ));
        let runtime = Runtime::new(cache, Arc::new(UlidGenerator::new(clock)), request_timeout);
        Fixture {
            store,
            backend,
            runtime,
        }
    }

    #[tokio::test]
    async fn generation_request_round_trip() {
        let fx = fixture(Duration::from_secs(5));
        let request = InferenceRequest::new("QmGpt", "text-generation", InferenceInput::Text("hello".into()))
            .with_parameters(json!({"max_length": 20}));

        let response = fx.runtime.infer(request).await.unwrap();

        assert_eq!(response.task, TaskKind::TextGeneration);
        assert_eq!(response.content_hash, "QmGpt");
        assert!(response.request_id.to_string().starts_with("req-"));
        assert_eq!(
            response.parameters_used,
            InferenceParameters::TextGeneration(TextGenerationParams {
                max_length: 20,
                ..TextGenerationParams::default()
            })
        );
        assert!(matches!(response.outcome, InferenceOutcome::TextGeneration(_)));
    }

    #[tokio::test]
    async fn unknown_task_fails_before_any_io() {
        let fx = fixture(Duration::from_secs(5));
        let request = InferenceRequest::new("QmGpt", "translation", InferenceInput::Text("hola".into()));

        let err = fx.runtime.infer(request).await.unwrap_err();

        assert!(matches!(err, HoardError::UnsupportedTask(ref t) if t == "translation"));
        assert_eq!(fx.store.resolve_count(), 0);
        assert_eq!(fx.backend.load_count(), 0);
    }

    #[tokio::test]
    async fn invalid_parameters_fail_before_any_io() {
        let fx = fixture(Duration::from_secs(5));
        let request = InferenceRequest::new("QmGpt", "text-generation", InferenceInput::Text("hi".into()))
            .with_parameters(json!({"temperature": 9.0}));

        let err = fx.runtime.infer(request).await.unwrap_err();

        assert_eq!(err.status(), StatusClass::BadRequest);
        assert_eq!(fx.store.resolve_count(), 0);
    }

    #[tokio::test]
    async fn malformed_hash_is_bad_request() {
        let fx = fixture(Duration::from_secs(5));
        let request = InferenceRequest::new("../etc", "text-generation", InferenceInput::Text("hi".into()));

        let envelope = fx.runtime.handle(request).await.unwrap_err();

        assert_eq!(envelope.status, StatusClass::BadRequest);
        assert_eq!(fx.store.resolve_count(), 0);
    }

    #[tokio::test]
    async fn missing_artifact_is_not_found() {
        let fx = fixture(Duration::from_secs(5));
        fx.store.mark_missing("QmGone");
        let request = InferenceRequest::new("QmGone", "speech-recognition", InferenceInput::Audio(vec![1]));

        let envelope = fx.runtime.handle(request).await.unwrap_err();

        assert_eq!(envelope.status, StatusClass::NotFound);
    }

    #[tokio::test]
    async fn slow_loads_hit_the_request_timeout() {
        let fx = fixture(Duration::from_millis(20));
        fx.backend.set_load_delay(Duration::from_millis(200));
        let request = InferenceRequest::new("QmSlow", "image-classification", InferenceInput::Image(vec![1]));

        let err = fx.runtime.infer(request).await.unwrap_err();

        assert!(matches!(err, HoardError::Timeout(_)));
        assert_eq!(err.status(), StatusClass::Internal);
    }

    #[tokio::test]
    async fn repeated_requests_reuse_the_loaded_model() {
        let fx = fixture(Duration::from_secs(5));
        for _ in 0..3 {
            let request =
                InferenceRequest::new("QmCls", "text-classification", InferenceInput::Text("ok".into()));
            fx.runtime.infer(request).await.unwrap();
        }

        assert_eq!(fx.backend.load_count(), 1);
        assert_eq!(fx.store.resolve_count(), 1);
        assert_eq!(fx.runtime.cache().status().counters.hits, 2);
    }
}
