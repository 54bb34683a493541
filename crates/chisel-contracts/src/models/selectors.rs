use super::operation::Operation;
use super::registry::{EngineRegistry, EngineSpec};
use crate::providers::Provider;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSelection {
    pub engine: EngineSpec,
    pub requested: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EngineSelector {
    pub registry: EngineRegistry,
}

impl EngineSelector {
    pub fn new(registry: Option<EngineRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_default(),
        }
    }

    /// Resolves an explicit engine strictly; `None` falls back to the provider's
    /// first engine for the operation.
    pub fn select(
        &self,
        provider: Provider,
        operation: Operation,
        requested: Option<&str>,
    ) -> Result<EngineSelection, String> {
        if let Some(requested_value) = requested.map(str::trim).filter(|value| !value.is_empty()) {
            return self
                .registry
                .ensure(requested_value, provider, operation)
                .map(|engine| EngineSelection {
                    engine,
                    requested: Some(requested_value.to_string()),
                })
                .ok_or_else(|| {
                    format!("{requested_value} is not a valid {provider} engine for '{operation}'.")
                });
        }

        let candidates = self.registry.for_provider(provider, operation);
        let Some(engine) = candidates.first().cloned() else {
            return Err(format!(
                "No {provider} engines available for '{operation}'."
            ));
        };
        Ok(EngineSelection {
            engine,
            requested: None,
        })
    }
}
