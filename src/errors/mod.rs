mod engine_error;
mod transport_error;

pub use engine_error::{CacheError, EngineError, ErrorKind, ValidationError};
pub use transport_error::{TransportError, TransportErrorKind};
