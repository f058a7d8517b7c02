mod auth;
mod connector;
mod operation;
mod policy;

pub use auth::{AuthDescriptor, OAuth2Descriptor};
pub use connector::{Connector, ConnectorConfig};
pub use operation::{
    CompiledSchema, OperationCatalog, OperationSpec, ParamBinding, ParamRole, RuleKind,
    ValidationRule,
};
pub use policy::{BackoffKind, CachePolicy, RateLimitPolicy, RetryPolicy, Timeouts};
