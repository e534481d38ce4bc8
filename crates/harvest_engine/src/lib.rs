//! Harvest engine: rate-limited fetching, resumable caching, durable
//! collection storage and the pipeline tying them together.
mod cache;
mod config;
mod decode;
mod extract;
mod fetcher;
mod limiter;
mod persist;
mod pipeline;
mod report;
mod retry;
mod stats;
mod store;
mod transport;
mod types;

pub use cache::{CacheError, CacheReport, CacheStats, Metadata, ProcessedUrl, ResumeCache};
pub use config::{
    ConfigError, EngineConfig, FetchSettings, Paths, PipelineSettings, RetryPolicy, StoreSettings,
};
pub use decode::{decode_body, DecodeError, DecodedBody};
pub use extract::{Extractor, GiftPageExtractor};
pub use fetcher::RateLimitedFetcher;
pub use limiter::RateLimiter;
pub use persist::{ensure_dir, AtomicFileWriter, PersistError, StagedWrite};
pub use pipeline::{Pipeline, PipelineError, RunReport};
pub use report::{ChannelReporter, LogReporter, NullReporter, ProgressThrottle, ReportEvent, Reporter};
pub use retry::{backoff_delay, classify, retry_with_backoff, RetryDisposition, RetryError};
pub use stats::{CompletionEstimate, FetchStats, FetchStatsSnapshot};
pub use store::{
    CollectionBackend, CollectionStats, CollectionStore, JsonFileBackend, MemoryBackend, StoreError,
    StoreOverview,
};
pub use transport::{ReqwestTransport, Transport};
pub use types::{FailureKind, FetchError, FetchMetadata, FetchOutput, FetchResult};
