//! Admin hook registry.
//!
//! Modules register named handlers during `setup_admin_handlers`. The daemon
//! freezes the registry and serves it over its loopback API. Handlers take a
//! JSON argument object and return a JSON value.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

pub type AdminHandler = Arc<dyn Fn(&Value) -> Result<Value, AdminError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdminError {
    #[error("no admin handler named {0}")]
    Unknown(String),

    #[error("admin handler {0} already registered")]
    Duplicate(String),

    #[error("{0}")]
    Failed(String),
}

struct Entry {
    description: String,
    handler: AdminHandler,
}

#[derive(Default)]
pub struct AdminHandlers {
    entries: BTreeMap<String, Entry>,
}

impl AdminHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&mut self, name: &str, description: &str, handler: F) -> Result<(), AdminError>
    where
        F: Fn(&Value) -> Result<Value, AdminError> + Send + Sync + 'static,
    {
        if self.entries.contains_key(name) {
            return Err(AdminError::Duplicate(name.to_string()));
        }
        tracing::debug!(handler = name, "admin handler registered");
        self.entries.insert(
            name.to_string(),
            Entry {
                description: description.to_string(),
                handler: Arc::new(handler),
            },
        );
        Ok(())
    }

    /// (name, description) pairs in name order.
    pub fn list(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(name, e)| (name.clone(), e.description.clone()))
            .collect()
    }

    pub fn call(&self, name: &str, args: &Value) -> Result<Value, AdminError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| AdminError::Unknown(name.to_string()))?;
        (entry.handler)(args)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registered_handler_is_callable() {
        let mut admin = AdminHandlers::new();
        admin
            .add("echo", "return the arguments", |args| Ok(args.clone()))
            .unwrap();

        let out = admin.call("echo", &json!({"a": 1})).unwrap();
        assert_eq!(out, json!({"a": 1}));
        assert_eq!(admin.list(), vec![("echo".to_string(), "return the arguments".to_string())]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut admin = AdminHandlers::new();
        admin.add("x", "", |_| Ok(Value::Null)).unwrap();
        assert_eq!(
            admin.add("x", "", |_| Ok(Value::Null)).unwrap_err(),
            AdminError::Duplicate("x".to_string())
        );
        assert_eq!(admin.len(), 1);
    }

    #[test]
    fn unknown_handler_errors() {
        let admin = AdminHandlers::new();
        assert!(admin.is_empty());
        assert_eq!(
            admin.call("missing", &Value::Null).unwrap_err(),
            AdminError::Unknown("missing".to_string())
        );
    }
}
