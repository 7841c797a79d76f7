pub mod gulp;
pub mod processor;
pub mod runtime;
pub mod source;

pub use gulp::{CallbackObserver, GulpEvent, GulpKey, GulpObserver, Segment, TimeWindow};
pub use processor::gulper::{GulpError, GulperHandle, GulperStatus};
pub use processor::registry::{GulpRequest, GulpResponse, GulperRegistry};
pub use runtime::config::{GulpConfig, GulpConfigBuilder, GulpConfigParams, GULP_SIZE};
pub use runtime::telemetry::{init_tracing, IntervalActivity, Telemetry, TelemetrySnapshot};
pub use source::{Cache, CacheSummary, DataSource, MemoryCache, SourceError};
