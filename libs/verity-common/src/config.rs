// Defaults shared by the worker and the CLI

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_RESULT_TTL_SECONDS: u64 = 86400;
pub const DEFAULT_WORKER_CONCURRENCY: usize = 4;

/// Redis URL from `REDIS_URL`, falling back to localhost.
pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string())
}

/// Read a numeric environment variable, ignoring unparseable values.
pub fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
