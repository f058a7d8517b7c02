pub mod network {
    pub const TIMEOUT_CONNECT_MS: u64 = 10_000;
    pub const TIMEOUT_READ_MS: u64 = 30_000;
    pub const TIMEOUT_TOTAL_MS: u64 = 120_000;
    pub const USER_AGENT: &str = concat!("connector-engine/", env!("CARGO_PKG_VERSION"));
}

pub mod retry {
    pub const MAX_ATTEMPTS: u32 = 3;
    pub const BASE_DELAY_MS: u64 = 1_000;
    pub const MAX_DELAY_MS: u64 = 60_000;
    pub const STATUS_CODES: &[u16] = &[429, 500, 502, 503, 504];
    pub const MAX_RETRY_AFTER_SECONDS: u64 = 3_600;
}

pub mod rate_limit {
    pub const REQUESTS_PER_SECOND: f64 = 10.0;
    pub const BURST_SIZE: u32 = 10;
    pub const COST_PER_REQUEST: u32 = 1;
}

pub mod cache {
    pub const DEFAULT_TTL_SECONDS: u64 = 300;
    pub const KEY_TEMPLATE: &str = "{connector}:{operation}:{hash}";
    pub const MAX_ENTRIES: usize = 10_000;
    pub const SWEEP_INTERVAL_MS: u64 = 60_000;
    pub const CACHEABLE_METHODS: &[&str] = &["GET"];
}

pub mod auth {
    pub const TOKEN_EXPIRY_SKEW_MS: u64 = 30_000;
    pub const DEFAULT_TOKEN_TTL_SECONDS: u64 = 3_600;
    pub const TOKEN_FETCH_WAIT_MS: u64 = 2_000;
}

pub mod limits {
    /// Upper bound for any duration read from a connector definition.
    pub const MAX_CONFIGURED_DURATION_SECS: u64 = 365 * 24 * 60 * 60;
}

pub mod envelope {
    pub const MAX_ERROR_BODY_BYTES: usize = 2_048;
}

pub mod protocols {
    pub const ALLOWED_HTTP: &[&str] = &["http:", "https:"];
}
