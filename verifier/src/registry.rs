use std::collections::HashMap;

use crate::{
    digest,
    Capability, CapabilityKey, InitFn, VerifyFn,
    Family, Commitment,
    UnsupportedCapability,
};

/// Verification routines indexed by (layout, commitment).
#[derive(Debug, Default)]
pub struct Registry {
    verifiers: HashMap<CapabilityKey, Capability>,
}

impl Registry {
    pub fn empty() -> Self {
        Self::default()
    }

    // every pair served by the public input digest
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for family in Family::ALL {
            for commitment in Commitment::ALL {
                let key = CapabilityKey::new(family, commitment);
                if let Some((init, verify)) = builtin(key) {
                    registry.register(key, init, verify);
                }
            }
        }
        registry
    }

    /// Installs a routine for `key`, handing back the one it replaces.
    pub fn register(
        &mut self,
        key: CapabilityKey,
        init: InitFn,
        verify: VerifyFn,
    ) -> Option<Capability> {
        self.verifiers.insert(key, Capability::new(key, init, verify))
    }

    pub fn resolve(
        &self,
        family: &str,
        commitment: &str,
    ) -> Result<Capability, UnsupportedCapability> {
        self.resolve_key(CapabilityKey::parse(family, commitment)?)
    }

    pub fn resolve_key(
        &self,
        key: CapabilityKey,
    ) -> Result<Capability, UnsupportedCapability> {
        self.verifiers
            .get(&key)
            .cloned()
            .ok_or(UnsupportedCapability::Unregistered(key))
    }

    pub fn contains(&self, key: CapabilityKey) -> bool {
        self.verifiers.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.verifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verifiers.is_empty()
    }
}

// a new layout or commitment must be wired here before it compiles
fn builtin(key: CapabilityKey) -> Option<(InitFn, VerifyFn)> {
    use Family::*;
    use Commitment::*;
    match (key.family, key.commitment) {
        (Dex | Recursive | RecursiveWithPoseidon | Small | Starknet | StarknetWithKeccak, Blake256) =>
            Some((digest::init, digest::verify_blake256)),

        (Dex | Recursive | RecursiveWithPoseidon | Small | Starknet | StarknetWithKeccak, Keccak256) =>
            Some((digest::init, digest::verify_keccak256)),
    }
}
