pub mod connector;
pub mod engine;
