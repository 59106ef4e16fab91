//! Block registry: create blocks by type name and parameterization
//!
//! Block types register one factory per parameterization, e.g.
//! `flowgraph::Head` with `f32`, `i32`, ... The process-wide registry is
//! populated with every built-in block on first use.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError, RwLock};

use tracing::debug;

use super::block::{BlockNode, instantiated_type_name};
use super::errors::RegistryError;
use super::node::{Block, BlockType};
use super::value::PropertyMap;

type BlockFactoryFn = Box<dyn Fn() -> Box<dyn Block> + Send + Sync>;

/// Registry of block factories
pub struct BlockRegistry {
    factories: RwLock<BTreeMap<String, BTreeMap<String, BlockFactoryFn>>>,
    /// Next sequence index per instantiated type name
    sequence: Mutex<HashMap<String, u64>>,
}

impl BlockRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(BTreeMap::new()),
            sequence: Mutex::new(HashMap::new()),
        }
    }

    /// Create a registry holding every built-in block
    pub fn with_builtin_blocks() -> Self {
        let registry = Self::new();
        crate::blocks::register_builtin_blocks(&registry);
        registry
    }

    /// Register `B` under its type name and parameterization
    pub fn add_block_type<B: BlockType>(&self) -> Result<(), RegistryError> {
        self.add_block_factory(B::TYPE_NAME, &B::parameterization(), || {
            Box::new(B::default()) as Box<dyn Block>
        })
    }

    /// Register a factory for `type_name` with `parameterization`
    pub fn add_block_factory<F>(
        &self,
        type_name: &str,
        parameterization: &str,
        factory: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn() -> Box<dyn Block> + Send + Sync + 'static,
    {
        let mut factories = self.factories.write().unwrap_or_else(PoisonError::into_inner);
        let parameterizations = factories.entry(type_name.to_string()).or_default();
        if parameterizations.contains_key(parameterization) {
            return Err(RegistryError::DuplicateBlock {
                type_name: type_name.to_string(),
                parameterization: parameterization.to_string(),
            });
        }
        parameterizations.insert(parameterization.to_string(), Box::new(factory));
        debug!(
            "Registered {}",
            instantiated_type_name(type_name, parameterization)
        );
        Ok(())
    }

    /// Type names with at least one registered parameterization
    pub fn provided_blocks(&self) -> Vec<String> {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, parameterizations)| !parameterizations.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Every type name the registry knows about
    pub fn known_blocks(&self) -> Vec<String> {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Parameterizations registered for `type_name`
    pub fn known_block_parameterizations(&self, type_name: &str) -> Vec<String> {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(type_name)
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_block_known(&self, type_name: &str, parameterization: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(type_name)
            .is_some_and(|p| p.contains_key(parameterization))
    }

    /// Instantiate a block and apply its initial settings
    pub fn create_block(
        &self,
        type_name: &str,
        parameterization: &str,
        settings: &PropertyMap,
    ) -> Result<BlockNode, RegistryError> {
        let block = {
            let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
            let factory = factories
                .get(type_name)
                .and_then(|p| p.get(parameterization))
                .ok_or_else(|| RegistryError::UnknownBlock {
                    type_name: type_name.to_string(),
                    parameterization: parameterization.to_string(),
                })?;
            factory()
        };

        let sequence =
            self.next_sequence_index(&instantiated_type_name(type_name, parameterization));
        let mut node = BlockNode::new(type_name, parameterization, block, sequence);
        node.apply_initial_settings(settings)?;
        Ok(node)
    }

    /// Wrap an already constructed block, validating its settings
    pub fn wrap_block<B: BlockType>(&self, block: B) -> Result<BlockNode, RegistryError> {
        let parameterization = B::parameterization();
        let sequence =
            self.next_sequence_index(&instantiated_type_name(B::TYPE_NAME, &parameterization));
        let mut node = BlockNode::new(B::TYPE_NAME, &parameterization, Box::new(block), sequence);
        node.apply_initial_settings(&PropertyMap::new())?;
        Ok(node)
    }

    fn next_sequence_index(&self, instantiated: &str) -> u64 {
        let mut sequence = self.sequence.lock().unwrap_or_else(PoisonError::into_inner);
        let next = sequence.entry(instantiated.to_string()).or_insert(0);
        let index = *next;
        *next += 1;
        index
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static::lazy_static! {
    static ref GLOBAL_BLOCK_REGISTRY: BlockRegistry = BlockRegistry::with_builtin_blocks();
}

/// The process-wide registry, populated with the built-in blocks
pub fn global_block_registry() -> &'static BlockRegistry {
    &GLOBAL_BLOCK_REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{Head, NullSource};
    use crate::property_map;
    use crate::runtime::errors::SettingsError;

    #[test]
    fn test_unique_names_increment() {
        let registry = BlockRegistry::with_builtin_blocks();
        let a = registry
            .create_block("flowgraph::NullSource", "i32", &PropertyMap::new())
            .unwrap();
        let b = registry
            .create_block("flowgraph::NullSource", "i32", &PropertyMap::new())
            .unwrap();
        let c = registry
            .create_block("flowgraph::NullSource", "f32", &PropertyMap::new())
            .unwrap();

        assert_eq!(a.name(), "flowgraph::NullSource<i32>");
        assert_eq!(a.unique_name(), "flowgraph::NullSource<i32>#0");
        assert_eq!(b.unique_name(), "flowgraph::NullSource<i32>#1");
        assert_eq!(c.unique_name(), "flowgraph::NullSource<f32>#0");
    }

    #[test]
    fn test_unknown_block() {
        let registry = BlockRegistry::with_builtin_blocks();
        let err = registry
            .create_block("flowgraph::Nope", "f32", &PropertyMap::new())
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownBlock { .. }));

        let err = registry
            .create_block("flowgraph::Head", "bool", &PropertyMap::new())
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownBlock { .. }));
    }

    #[test]
    fn test_initial_settings_applied() {
        let registry = BlockRegistry::with_builtin_blocks();
        let node = registry
            .create_block("flowgraph::Head", "u8", &property_map! { "num_items" => 3u64 })
            .unwrap();
        assert_eq!(node.block_as::<Head<u8>>().unwrap().num_items(), 3);

        let err = registry
            .create_block("flowgraph::Head", "u8", &property_map! { "foo" => 1i32 })
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Settings(SettingsError::UnknownKey { .. })
        ));
    }

    #[test]
    fn test_duplicate_registration() {
        let registry = BlockRegistry::new();
        registry.add_block_type::<NullSource<f32>>().unwrap();
        assert!(matches!(
            registry.add_block_type::<NullSource<f32>>(),
            Err(RegistryError::DuplicateBlock { .. })
        ));
        assert_eq!(registry.provided_blocks(), vec!["flowgraph::NullSource"]);
        assert_eq!(
            registry.known_block_parameterizations("flowgraph::NullSource"),
            vec!["f32"]
        );
        assert!(registry.is_block_known("flowgraph::NullSource", "f32"));
        assert!(!registry.is_block_known("flowgraph::NullSource", "f64"));
    }
}
