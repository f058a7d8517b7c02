use crate::config::Connector;
use crate::errors::EngineError;
use crate::managers::engine::Engine;
use crate::services::auth::Credentials;
use crate::services::normalizer::Envelope;
use crate::services::validation::Validation;
use crate::utils::suggest::choice_hint;
use serde_json::Value;

const CONNECTOR_ACTIONS: &[&str] = &[
    "execute",
    "list_operations",
    "describe",
    "cache_stats",
    "cache_clear",
];

/// A connector bound to its credentials and a shared engine. This is the
/// whole adapter surface a concrete integration needs.
#[derive(Clone)]
pub struct ConnectorManager {
    engine: Engine,
    connector: Connector,
    credentials: Credentials,
    validation: Validation,
}

impl ConnectorManager {
    pub fn new(engine: Engine, connector: Connector, credentials: Credentials) -> Self {
        Self {
            engine,
            connector,
            credentials,
            validation: Validation::new(),
        }
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    pub async fn execute(&self, operation: &str, params: Value) -> Envelope {
        self.engine
            .execute(&self.connector, operation, &params, &self.credentials)
            .await
    }

    pub async fn handle_action(&self, args: Value) -> Result<Value, EngineError> {
        let action = args.get("action").and_then(|v| v.as_str()).unwrap_or("");
        match action {
            "execute" => {
                let operation = self.validation.ensure_string(args.get("operation"), "operation")?;
                let params = self.validation.ensure_object(args.get("params"), "params")?;
                Ok(self.execute(&operation, params).await.to_value())
            }
            "list_operations" => Ok(self.list_operations()),
            "describe" => {
                let operation = self.validation.ensure_string(args.get("operation"), "operation")?;
                Ok(self.connector.catalog.get(&operation)?.describe())
            }
            "cache_stats" => Ok(serde_json::json!({
                "connector": self.connector.name(),
                "cache": self.engine.cache_stats(self.connector.name()),
            })),
            "cache_clear" => Ok(serde_json::json!({
                "connector": self.connector.name(),
                "cleared": self.engine.clear_cache(self.connector.name()),
            })),
            _ => Err(EngineError::UnknownAction {
                action: action.to_string(),
                hint: choice_hint(action, CONNECTOR_ACTIONS),
            }),
        }
    }

    pub fn list_operations(&self) -> Value {
        let operations: Vec<Value> = self
            .connector
            .catalog
            .names()
            .filter_map(|name| self.connector.catalog.get(name).ok())
            .map(|spec| {
                serde_json::json!({
                    "name": spec.name,
                    "method": spec.method.as_str(),
                    "endpoint": spec.endpoint,
                    "description": spec.description,
                })
            })
            .collect();
        serde_json::json!({
            "connector": self.connector.name(),
            "base_url": self.connector.config.base_url,
            "operations": operations,
        })
    }
}
