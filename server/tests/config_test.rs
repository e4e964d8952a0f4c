//! Configuration loading tests.
//!
//! Environment variables are process-global shared state, so every test here
//! is serialized.

use serial_test::serial;

use traceloom_server::config::Config;

const ALL_VARS: [&str; 9] = [
    "BIND_ADDRESS",
    "GRPC_BIND_ADDRESS",
    "DATABASE_URL",
    "REDIS_URL",
    "ELASTICSEARCH_URL",
    "ES_INDEX_PREFIX",
    "JWT_SECRET",
    "PRICING_TABLE_PATH",
    "RATELIMIT_KEY_PREFIX",
];

fn clear_env() {
    for var in ALL_VARS {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn from_env_applies_defaults_for_optional_vars() {
    clear_env();
    std::env::set_var("DATABASE_URL", "postgresql://app:app@db:5432/traceloom");
    std::env::set_var("JWT_SECRET", "s3cret");

    let config = Config::from_env().unwrap();
    assert_eq!(config.bind_address, "0.0.0.0:4318");
    assert_eq!(config.grpc_bind_address, "0.0.0.0:4317");
    assert_eq!(config.elasticsearch_url, "http://localhost:9200");
    assert_eq!(config.es_index_prefix, "spans");
    assert_eq!(config.ratelimit_key_prefix, "tl:rl");
    assert!(config.redis_url.is_none());
    assert!(config.pricing_table_path.is_none());
}

#[test]
#[serial]
fn from_env_reads_explicit_overrides() {
    clear_env();
    std::env::set_var("DATABASE_URL", "postgresql://app:app@db:5432/traceloom");
    std::env::set_var("JWT_SECRET", "s3cret");
    std::env::set_var("BIND_ADDRESS", "127.0.0.1:9999");
    std::env::set_var("REDIS_URL", "redis://cache:6379");
    std::env::set_var("ELASTICSEARCH_URL", "http://search:9200");
    std::env::set_var("ES_INDEX_PREFIX", "tl-spans");

    let config = Config::from_env().unwrap();
    assert_eq!(config.bind_address, "127.0.0.1:9999");
    assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
    assert_eq!(config.elasticsearch_url, "http://search:9200");
    assert_eq!(config.es_index_prefix, "tl-spans");
}

#[test]
#[serial]
fn missing_database_url_is_an_error() {
    clear_env();
    std::env::set_var("JWT_SECRET", "s3cret");

    let error = Config::from_env().unwrap_err();
    assert!(error.to_string().contains("DATABASE_URL"));
}

#[test]
#[serial]
fn missing_jwt_secret_is_an_error() {
    clear_env();
    std::env::set_var("DATABASE_URL", "postgresql://app:app@db:5432/traceloom");

    let error = Config::from_env().unwrap_err();
    assert!(error.to_string().contains("JWT_SECRET"));
}
