pub mod auth;
pub mod cache;
pub mod logger;
pub mod normalizer;
pub mod rate_limiter;
pub mod resolver;
pub mod retry;
pub mod transport;
pub mod validation;
