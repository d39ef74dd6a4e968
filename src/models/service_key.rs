use serde::{Deserialize, Serialize};
use std::fmt;

/// Compound (service, operation) key used by breakers, retry queues and fallbacks
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceKey {
    pub service: String,
    pub operation: String,
}

impl ServiceKey {
    pub fn new(service: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
        }
    }

    /// Identifier used for persisted records.
    ///
    /// The service part is escaped so that a `:` inside a service name cannot
    /// make two keys share an id.
    pub fn storage_id(&self) -> String {
        let service = self.service.replace('%', "%25").replace(':', "%3A");
        format!("{service}:{}", self.operation)
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service, self.operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_keys_with_separator_do_not_collide() {
        let left = ServiceKey::new("a:b", "c");
        let right = ServiceKey::new("a", "b:c");
        assert_eq!(left.to_string(), right.to_string());
        assert_ne!(left, right);
        assert_ne!(left.storage_id(), right.storage_id());
        assert_eq!(right.storage_id(), "a:b:c");

        let mut map = HashMap::new();
        map.insert(left.clone(), 1);
        map.insert(right.clone(), 2);
        assert_eq!(map.len(), 2);
    }
}
