//! Security access key derivation

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::SecurityConfig;

/// Computes a SecurityAccess key from the ECU's seed.
///
/// Real algorithms are OEM-specific and usually proprietary; implementations
/// are registered on the engine builder by name.
pub trait KeyDerivation: Send + Sync {
    fn derive_key(&self, level: u8, seed: &[u8]) -> Vec<u8>;
}

impl<F> KeyDerivation for F
where
    F: Fn(u8, &[u8]) -> Vec<u8> + Send + Sync,
{
    fn derive_key(&self, level: u8, seed: &[u8]) -> Vec<u8> {
        self(level, seed)
    }
}

/// Key equals seed
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityKey;

impl KeyDerivation for IdentityKey {
    fn derive_key(&self, _level: u8, seed: &[u8]) -> Vec<u8> {
        seed.to_vec()
    }
}

/// Every seed byte XORed with a fixed mask
#[derive(Debug, Clone, Copy)]
pub struct XorKey {
    pub mask: u8,
}

impl KeyDerivation for XorKey {
    fn derive_key(&self, _level: u8, seed: &[u8]) -> Vec<u8> {
        seed.iter().map(|b| b ^ self.mask).collect()
    }
}

/// Named key derivation algorithms
#[derive(Clone, Default)]
pub struct KeyRegistry {
    custom: HashMap<String, Arc<dyn KeyDerivation>>,
}

impl KeyRegistry {
    pub const BUILTIN: [&'static str; 2] = ["identity", "xor"];

    pub fn register(&mut self, name: impl Into<String>, algorithm: Arc<dyn KeyDerivation>) {
        self.custom.insert(name.into(), algorithm);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.custom.contains_key(name) || Self::BUILTIN.contains(&name)
    }

    /// Resolve the algorithm selected by a target's security config.
    /// Registered algorithms shadow the built-ins.
    pub fn resolve(&self, config: &SecurityConfig) -> Option<Arc<dyn KeyDerivation>> {
        if let Some(custom) = self.custom.get(&config.algorithm) {
            return Some(custom.clone());
        }
        match config.algorithm.as_str() {
            "identity" => Some(Arc::new(IdentityKey)),
            "xor" => Some(Arc::new(XorKey {
                mask: config.xor_mask,
            })),
            _ => None,
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = Self::BUILTIN.iter().map(|s| s.to_string()).collect();
        names.extend(self.custom.keys().cloned());
        names.sort();
        names.dedup();
        names
    }
}

impl std::fmt::Debug for KeyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRegistry")
            .field("algorithms", &self.names())
            .finish()
    }
}
