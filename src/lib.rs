pub mod buggify;
pub mod config;
pub mod error;
pub mod observability;
pub mod server;
pub mod stats;
pub mod store;

pub use config::{ConnectionConfig, LogFormat, ServerConfig, StatsConfig};
pub use error::{CodecError, ConfigError, StatsError, StatsResult, StoreError, StoreResult};
pub use server::{ServerHandle, StatsServer};
pub use stats::{JobId, JobStats, KeyNamespace, MetricValue, Number, StatsCollector, ValueCodec};
pub use store::{BatchMode, MemoryStore, Reply, RespStore, StoreClient, StoreOp};
