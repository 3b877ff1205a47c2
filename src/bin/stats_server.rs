//! Stats Server
//!
//! In-memory RESP server holding job metrics. Any collector configured with
//! its address (or any Redis client) can use it as the backing store.
//!
//! ## Usage
//!
//! ```text
//! stats-server [CONFIG.toml]
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | STATS_CONFIG | (none) | Config file, when no argument is given |
//! | STATS_BIND | 127.0.0.1:6379 | Listen address |
//! | STATS_REQUIRE_PASS | (none) | Password clients must AUTH with |
//! | STATS_LOG_FORMAT | human | `human` or `json` |
//! | RUST_LOG | info | Log filter |

use std::path::PathBuf;

use redis_stats::{observability, StatsConfig, StatsServer};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("STATS_CONFIG").ok())
        .map(PathBuf::from);

    let config = match StatsConfig::load(path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };
    observability::init(config.server.log_format);

    info!(
        bind = %config.server.bind,
        config = ?path,
        "starting stats server"
    );

    let server = StatsServer::new(config.server);
    if let Err(e) = server.run().await {
        error!("Stats server failed: {}", e);
        return Err(e.into());
    }
    Ok(())
}
