use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use anyhow;

use crate::{
    CapabilityKey, UnsupportedCapability,
};

/// The two tags a proof carries about itself that pick its verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofHeader {
    // `public_input.layout`
    pub layout: Option<String>,

    // `proof_parameters.pow_hash`
    pub pow_hash: Option<String>,
}

impl ProofHeader {
    pub fn parse(artifact: &[u8]) -> anyhow::Result<Self> {
        let proof: Value = serde_json::from_slice(artifact)?;
        let tag = |pointer: &str| {
            proof
                .pointer(pointer)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Ok(Self {
            layout: tag("/public_input/layout"),
            pow_hash: tag("/proof_parameters/pow_hash"),
        })
    }

    pub fn capability_key(&self) -> Result<CapabilityKey, UnsupportedCapability> {
        let layout = self.layout
            .as_deref()
            .ok_or(UnsupportedCapability::Missing("layout"))?;
        let pow_hash = self.pow_hash
            .as_deref()
            .ok_or(UnsupportedCapability::Missing("commitment scheme"))?;
        CapabilityKey::parse(layout, pow_hash)
    }
}

// the parts of a stone proof the digest looks at
#[derive(Debug, Deserialize)]
pub(crate) struct StarkProof {
    pub proof_parameters: ProofParameters,
    pub public_input: PublicInput,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProofParameters {
    pub pow_hash: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PublicInput {
    pub layout: String,

    #[serde(default)]
    pub memory_segments: BTreeMap<String, Segment>,

    #[serde(default)]
    pub public_memory: Vec<MemoryCell>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub(crate) struct Segment {
    pub begin_addr: u64,
    pub stop_ptr: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MemoryCell {
    pub address: u64,
    pub value: String,
}

impl PublicInput {
    pub fn segment(&self, name: &str) -> anyhow::Result<Segment> {
        self.memory_segments
            .get(name)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("memory segment `{name}` is missing"))
    }

    // public memory values of a segment, ordered by address
    pub fn cells(&self, segment: Segment) -> Vec<&str> {
        self.public_memory
            .iter()
            .filter(|c| c.address >= segment.begin_addr && c.address < segment.stop_ptr)
            .map(|c| (c.address, c.value.as_str()))
            .collect::<BTreeMap<_, _>>()
            .into_values()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fixtures, Family, Commitment};

    #[test]
    fn header_tags_come_from_the_proof() {
        let header = ProofHeader::parse(fixtures::proof("starknet", "blake256").as_bytes()).unwrap();
        assert_eq!(header.layout.as_deref(), Some("starknet"));
        assert_eq!(
            header.capability_key().unwrap(),
            CapabilityKey::new(Family::Starknet, Commitment::Blake256)
        );
    }

    #[test]
    fn missing_tags_are_unsupported() {
        let header = ProofHeader::parse(br#"{"public_input": {"layout": "dex"}}"#).unwrap();
        assert_eq!(
            header.capability_key().unwrap_err(),
            UnsupportedCapability::Missing("commitment scheme")
        );
    }

    #[test]
    fn non_json_artifact_is_rejected() {
        assert!(ProofHeader::parse(&[0xde, 0xad, 0xbe, 0xef]).is_err());
    }

    #[test]
    fn cells_are_sliced_and_sorted() {
        let proof: StarkProof = serde_json::from_str(&fixtures::proof("small", "keccak256")).unwrap();
        let output = proof.public_input.segment("output").unwrap();
        assert_eq!(proof.public_input.cells(output), vec!["0x2a", "0x7"]);
        assert!(proof.public_input.segment("pedersen").is_err());
    }
}
