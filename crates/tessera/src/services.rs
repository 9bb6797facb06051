//! Named service values available to formatters and as `$services.<name>`.

use crate::value::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceCollection {
    services: BTreeMap<String, Value>,
}

impl ServiceCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.services.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.services.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// All services as one object, the value of `$services`.
    pub fn as_value(&self) -> Value {
        Value::object(
            self.services
                .iter()
                .map(|(name, value)| (name.clone(), value.clone())),
        )
    }
}
