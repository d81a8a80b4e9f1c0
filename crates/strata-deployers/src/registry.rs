//! Deployer registry keyed by deploy item type

use crate::deployer::Deployer;
use std::collections::BTreeMap;
use std::sync::Arc;
use strata_core::{Error, Result};

#[derive(Clone, Default)]
pub struct DeployerRegistry {
    deployers: BTreeMap<String, Arc<dyn Deployer>>,
}

impl DeployerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a deployer under its type name, replacing any previous one
    pub fn register(&mut self, deployer: Arc<dyn Deployer>) -> &mut Self {
        let type_name = deployer.type_name().to_string();
        if self.deployers.insert(type_name.clone(), deployer).is_some() {
            tracing::warn!("Replacing deployer for type {}", type_name);
        }
        self
    }

    pub fn with(mut self, deployer: Arc<dyn Deployer>) -> Self {
        self.register(deployer);
        self
    }

    pub fn get(&self, type_name: &str) -> Result<Arc<dyn Deployer>> {
        self.deployers
            .get(type_name)
            .cloned()
            .ok_or_else(|| Error::UnknownDeployer {
                deployer_type: type_name.to_string(),
            })
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.deployers.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDeployer, MOCK_DEPLOYER_TYPE};

    #[test]
    fn test_lookup_by_type() {
        let registry = DeployerRegistry::new().with(Arc::new(MockDeployer::new()));
        assert!(registry.get(MOCK_DEPLOYER_TYPE).is_ok());
        assert_eq!(registry.types().collect::<Vec<_>>(), vec![MOCK_DEPLOYER_TYPE]);

        let err = registry.get("helm").err().unwrap();
        assert!(matches!(err, Error::UnknownDeployer { .. }));
        assert!(err.is_fatal());
    }
}
