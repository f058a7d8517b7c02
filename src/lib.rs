pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;
pub mod managers;
pub mod services;
pub mod utils;

pub use config::Connector;
pub use errors::{EngineError, ErrorKind};
pub use managers::connector::ConnectorManager;
pub use managers::engine::Engine;
pub use services::auth::Credentials;
pub use services::normalizer::{Envelope, EnvelopeStatus};
