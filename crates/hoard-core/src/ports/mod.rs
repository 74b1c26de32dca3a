//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」を定義します。
//! 外部システム（IPFS gateway、ローカルディスク、推論エンジン）への
//! インターフェースを trait として切り出し、実装の詳細を隠蔽します。

pub mod artifact_store;
pub mod backend;
pub mod clock;
pub mod event_sink;
pub mod gateway;
pub mod id_generator;

// 主要な trait を再エクスポート
pub use self::artifact_store::ArtifactStore;
pub use self::backend::{
    CausalLm, GenerationConfig, ImageClassifier, ImageProcessor, ModelBackend,
    SequenceClassifier, SpeechOptions, SpeechPipeline, Tokenizer,
};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::EventSink;
pub use self::gateway::{GatewayAttemptError, GatewayClient, GatewayResponse};
pub use self::id_generator::{IdGenerator, UlidGenerator};
