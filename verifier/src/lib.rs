mod capability;
mod digest;
pub mod executor;
pub mod proof;
mod registry;

#[cfg(test)]
pub(crate) mod fixtures;

use std::{
    fmt,
    str::FromStr,
};

use serde::{
    Serialize, Deserialize
};
use thiserror::Error;

pub use capability::{
    Capability, InitFn, VerifyFn,
};
pub use executor::{
    Executor, Verification,
};
pub use proof::ProofHeader;
pub use registry::Registry;

// proof layouts, aka the "family" of a proof
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    Dex,
    Recursive,
    RecursiveWithPoseidon,
    Small,
    Starknet,
    StarknetWithKeccak,
}

impl Family {
    pub const ALL: [Family; 6] = [
        Family::Dex,
        Family::Recursive,
        Family::RecursiveWithPoseidon,
        Family::Small,
        Family::Starknet,
        Family::StarknetWithKeccak,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Family::Dex => "dex",
            Family::Recursive => "recursive",
            Family::RecursiveWithPoseidon => "recursive_with_poseidon",
            Family::Small => "small",
            Family::Starknet => "starknet",
            Family::StarknetWithKeccak => "starknet_with_keccak",
        }
    }
}

impl FromStr for Family {
    type Err = UnsupportedCapability;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Family::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| UnsupportedCapability::UnknownFamily(s.to_string()))
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// hash used for the proof-of-work and the commitments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Commitment {
    #[serde(rename = "blake256")]
    Blake256,

    #[serde(rename = "keccak256")]
    Keccak256,
}

impl Commitment {
    pub const ALL: [Commitment; 2] = [
        Commitment::Blake256,
        Commitment::Keccak256,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Commitment::Blake256 => "blake256",
            Commitment::Keccak256 => "keccak256",
        }
    }
}

impl FromStr for Commitment {
    type Err = UnsupportedCapability;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Commitment::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnsupportedCapability::UnknownCommitment(s.to_string()))
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selects a verification routine: one per (layout, commitment) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapabilityKey {
    pub family: Family,
    pub commitment: Commitment,
}

impl CapabilityKey {
    pub fn new(family: Family, commitment: Commitment) -> Self {
        Self { family, commitment }
    }

    pub fn parse(
        family: &str,
        commitment: &str,
    ) -> Result<Self, UnsupportedCapability> {
        Ok(Self {
            family: family.parse()?,
            commitment: commitment.parse()?,
        })
    }
}

impl fmt::Display for CapabilityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.family, self.commitment)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnsupportedCapability {
    #[error("unknown layout `{0}`")]
    UnknownFamily(String),

    #[error("unknown commitment scheme `{0}`")]
    UnknownCommitment(String),

    #[error("the proof does not declare its {0}")]
    Missing(&'static str),

    #[error("the proof header cannot be read: {0}")]
    Unreadable(String),

    #[error("no verifier is registered for `{0}`")]
    Unregistered(CapabilityKey),
}
