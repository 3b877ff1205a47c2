//! Configuration loaded from TOML files drives collectors and servers.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use redis_stats::{
    ConfigError, JobId, LogFormat, MemoryStore, StatsCollector, StatsConfig, StoreClient,
};

fn write_config(text: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

#[test]
fn test_full_file() {
    let file = write_config(
        r#"
key_template = "metrics:{job}"
default_job = "batch"
persist = true
max_cas_attempts = 8

[connection]
url = "redis://:s3cret@stats.internal:6400/2"
socket_timeout = 2.5
retry_on_timeout = false

[server]
bind = "0.0.0.0:7000"
require_pass = "s3cret"
log_format = "json"
"#,
    );

    let config = StatsConfig::from_file(file.path()).unwrap();
    config.validate().unwrap();
    assert!(config.namespace().unwrap().is_hash());
    assert!(config.persist);
    assert_eq!(config.connection.socket_timeout, Duration::from_millis(2500));
    assert!(!config.connection.retry_on_timeout);
    assert_eq!(config.server.log_format, LogFormat::Json);

    let endpoint = config.connection.endpoint().unwrap();
    assert_eq!(endpoint.address(), "stats.internal:6400");
    assert_eq!(endpoint.password.as_deref(), Some("s3cret"));
    assert_eq!(endpoint.db, 2);
}

#[test]
fn test_file_config_shapes_collector() {
    let file = write_config(
        r#"
key_template = "metrics:{job}"
default_job = "batch"
persist = true
"#,
    );
    let config = StatsConfig::from_file(file.path()).unwrap();
    let store = Arc::new(MemoryStore::new());

    let mut stats = StatsCollector::from_config(Arc::clone(&store), &config).unwrap();
    // Nothing bound: the configured default job is used
    stats.inc_value("runs", 1).unwrap();
    assert_eq!(store.hash_get("metrics:batch", "runs").unwrap(), Some(b"1".to_vec()));

    // Persist from config keeps metrics on close
    let job = JobId::new("nightly").unwrap();
    stats.open(job.clone());
    stats.inc_value("runs", 1).unwrap();
    stats.close(&job, None).unwrap();
    assert!(store.hash_get("metrics:nightly", "runs").unwrap().is_some());

    // An explicit override still wins
    stats.close(&job, Some(false)).unwrap();
    assert!(store.hash_get_all("metrics:nightly").unwrap().is_empty());
}

#[test]
fn test_bad_files_are_rejected() {
    let file = write_config("key_template = \"static-key\"\n");
    let config = StatsConfig::from_file(file.path()).unwrap();
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidTemplate { .. })
    ));

    let file = write_config("persist = \"maybe\"\n");
    assert!(matches!(
        StatsConfig::from_file(file.path()),
        Err(ConfigError::Parse(_))
    ));

    assert!(matches!(
        StatsConfig::from_file("/nonexistent/stats.toml"),
        Err(ConfigError::Io(_))
    ));
}

#[test]
fn test_load_without_file_uses_defaults() {
    let config = StatsConfig::load(None).unwrap();
    assert_eq!(config.key_template, "{job}:stats:{metric}");
}
