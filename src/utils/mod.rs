pub mod redact;
pub mod stable_json;
pub mod suggest;
pub mod template;
