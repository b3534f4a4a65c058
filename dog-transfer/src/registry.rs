use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::{TransferError, TransferResult, Transfers};

/// Named [`Transfers`] instances shared across an application.
///
/// A name can be registered once; a second registration is a usage error
/// rather than a silent replacement.
#[derive(Default)]
pub struct TransferRegistry {
    services: RwLock<HashMap<String, Arc<Transfers>>>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<S>(&self, name: S, transfers: Arc<Transfers>) -> TransferResult<()>
    where
        S: Into<String>,
    {
        let name = name.into();
        let mut services = self.services.write();
        if services.contains_key(&name) {
            return Err(TransferError::usage(format!(
                "Transfer service `{}` is already registered.",
                name
            )));
        }
        debug!(name = %name, "registered transfer service");
        services.insert(name, transfers);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Transfers>> {
        self.services.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryAdapter;
    use crate::TransferConfig;

    fn transfers() -> Arc<Transfers> {
        Arc::new(Transfers::new(TransferConfig::new().with_adapter(MemoryAdapter::new())).unwrap())
    }

    #[test]
    fn double_registration_is_rejected() {
        let registry = TransferRegistry::new();
        registry.register("uploads", transfers()).unwrap();

        let err = registry.register("uploads", transfers()).unwrap_err();
        assert!(err.is_usage());
        assert!(err.message().contains("uploads"));
        assert_eq!(registry.names(), vec!["uploads".to_string()]);
    }

    #[test]
    fn lookup_returns_the_shared_instance() {
        let registry = TransferRegistry::new();
        let avatars = transfers();
        registry.register("avatars", avatars.clone()).unwrap();

        assert!(Arc::ptr_eq(&registry.get("avatars").unwrap(), &avatars));
        assert!(registry.get("missing").is_none());
    }
}
