// Public input digest: checks a proof is consistent with the verifier it was
// routed to and recomputes the program hash and output it claims. It does not
// check the FRI layers; full STARK verifiers are registered on top of it.

use blake2::{
    Blake2s256, Digest,
};
use sha3::Keccak256;
use futures::{
    future::BoxFuture,
    FutureExt,
};
use log::debug;
use anyhow;

use crate::{
    proof::StarkProof,
    Commitment,
};

pub fn init() -> BoxFuture<'static, anyhow::Result<()>> {
    async {
        debug!("Public input digest needs no setup.");
        Ok(())
    }
    .boxed()
}

pub fn verify_keccak256(proof: &str) -> anyhow::Result<String> {
    verify::<Keccak256>(proof, Commitment::Keccak256)
}

pub fn verify_blake256(proof: &str) -> anyhow::Result<String> {
    verify::<Blake2s256>(proof, Commitment::Blake256)
}

fn verify<D: Digest>(
    proof: &str,
    commitment: Commitment,
) -> anyhow::Result<String> {
    let proof: StarkProof = serde_json::from_str(proof)?;
    if proof.proof_parameters.pow_hash != commitment.as_str() {
        anyhow::bail!(
            "proof is committed with `{}` but the `{}` verifier was used",
            proof.proof_parameters.pow_hash,
            commitment
        );
    }
    let public_input = &proof.public_input;
    let program = public_input.cells(public_input.segment("program")?);
    if program.is_empty() {
        anyhow::bail!("program segment of a `{}` proof is empty", public_input.layout);
    }
    let mut hasher = D::new();
    for value in program {
        hasher.update(felt_bytes(value)?);
    }
    let program_hash = format!("0x{}", hex::encode(hasher.finalize()));
    let program_output: Vec<&str> = public_input.cells(public_input.segment("output")?);
    Ok(serde_json::to_string(&(program_hash, program_output))?)
}

// a field element as 32 big-endian bytes
fn felt_bytes(value: &str) -> anyhow::Result<[u8; 32]> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| anyhow::anyhow!("memory value `{value}` is not hex"))?;
    if digits.len() > 64 {
        anyhow::bail!("memory value `{value}` does not fit a field element");
    }
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(format!("{digits:0>64}"), &mut bytes)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn reports_hash_and_output() {
        let out = verify_keccak256(&fixtures::proof("small", "keccak256")).unwrap();
        let (hash, output): (String, Vec<String>) = serde_json::from_str(&out).unwrap();
        assert!(hash.starts_with("0x"));
        assert_eq!(hash.len(), 2 + 64);
        assert_eq!(output, vec!["0x2a", "0x7"]);
    }

    #[test]
    fn hash_follows_the_commitment() {
        let keccak = verify_keccak256(&fixtures::proof("dex", "keccak256")).unwrap();
        let blake = verify_blake256(&fixtures::proof("dex", "blake256")).unwrap();
        assert_ne!(keccak, blake);
    }

    #[test]
    fn rejects_foreign_commitment() {
        let err = verify_blake256(&fixtures::proof("dex", "keccak256")).unwrap_err();
        assert!(err.to_string().contains("keccak256"));
    }

    #[test]
    fn pads_short_felts() {
        let bytes = felt_bytes("0x1").unwrap();
        assert_eq!(bytes[31], 1);
        assert!(bytes[..31].iter().all(|b| *b == 0));
        assert!(felt_bytes("12").is_err());
        assert!(felt_bytes(&format!("0x{}", "f".repeat(65))).is_err());
    }
}
