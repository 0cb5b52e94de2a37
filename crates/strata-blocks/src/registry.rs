use std::collections::HashMap;
use std::sync::Arc;

use strata_types::StorageClass;

use crate::backend::BlobBackend;
use crate::error::{BlockError, BlockResult};

/// Maps each storage class to the backend that holds its bytes.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<StorageClass, Arc<dyn BlobBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration.
    pub fn with(mut self, class: StorageClass, backend: Arc<dyn BlobBackend>) -> Self {
        self.register(class, backend);
        self
    }

    /// Register (or replace) the backend for a class.
    pub fn register(&mut self, class: StorageClass, backend: Arc<dyn BlobBackend>) {
        tracing::debug!(%class, backend = backend.name(), "registered blob backend");
        self.backends.insert(class, backend);
    }

    pub fn get(&self, class: StorageClass) -> BlockResult<&Arc<dyn BlobBackend>> {
        self.backends.get(&class).ok_or(BlockError::NoBackend(class))
    }

    pub fn contains(&self, class: StorageClass) -> bool {
        self.backends.contains_key(&class)
    }

    /// Registered classes in tier order.
    pub fn classes(&self) -> Vec<StorageClass> {
        StorageClass::ALL
            .iter()
            .copied()
            .filter(|c| self.backends.contains_key(c))
            .collect()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for class in self.classes() {
            if let Some(backend) = self.backends.get(&class) {
                map.entry(&class.as_str(), &backend.name());
            }
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryBackend;

    #[test]
    fn lookup_by_class() {
        let registry = BackendRegistry::new()
            .with(StorageClass::Hot, Arc::new(InMemoryBackend::new("hot")))
            .with(StorageClass::Archive, Arc::new(InMemoryBackend::archival("glacier", 1)));

        assert_eq!(registry.get(StorageClass::Hot).unwrap().name(), "hot");
        assert!(registry.get(StorageClass::Archive).unwrap().requires_restore());
        assert!(matches!(
            registry.get(StorageClass::Cold),
            Err(BlockError::NoBackend(StorageClass::Cold))
        ));
        assert_eq!(
            registry.classes(),
            [StorageClass::Hot, StorageClass::Archive]
        );
    }
}
