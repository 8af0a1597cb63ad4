use std::collections::HashMap;

/// Injected lookup for values a node needs beyond its wired parameters
pub trait SecretLookup: Send + Sync {
    fn lookup(&self, key: &str) -> Option<String>;
}

/// Reads secrets from the process environment, optionally under a prefix
#[derive(Debug, Clone, Default)]
pub struct EnvSecrets {
    prefix: Option<String>,
}

impl EnvSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }
}

impl SecretLookup for EnvSecrets {
    fn lookup(&self, key: &str) -> Option<String> {
        let name = match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, key),
            None => key.to_string(),
        };
        std::env::var(name).ok()
    }
}

/// Fixed in-memory secrets
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets {
    values: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl SecretLookup for StaticSecrets {
    fn lookup(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}
