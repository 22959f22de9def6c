use anyhow::{anyhow, Result};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

/// Chain head used before the first entry of a topic.
pub const GENESIS_HASH: [u8; 32] = [0u8; 32];

/// Hashes a ledger entry payload with the previous chain hash.
pub fn hash_entry(prev_hash: &[u8; 32], payload: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash);
    hasher.update(payload);
    hasher.finalize().into()
}

/// Signs a ledger entry hash using Ed25519.
pub fn sign_entry(signing_key: &SigningKey, entry_hash: &[u8; 32]) -> [u8; 64] {
    signing_key.sign(entry_hash).to_bytes()
}

/// Verifies a ledger entry signature against its entry hash.
pub fn verify_entry_signature(
    verifying_key: &VerifyingKey,
    entry_hash: &[u8; 32],
    signature: &[u8; 64],
) -> Result<()> {
    let sig = ed25519_dalek::Signature::from_bytes(signature);
    verifying_key
        .verify(entry_hash, &sig)
        .map_err(|e| anyhow!("signature verification failed: {}", e))
}

const DEVICE_KEY_CONTEXT: &[u8] = b"tutela/ledger-device-key/v1\0";

/// Device signing key: SHA-256 of a fixed context label and the trimmed seed.
pub fn signing_key_from_seed(seed: &str) -> Result<SigningKey> {
    let seed = seed.trim();
    if seed.is_empty() {
        return Err(anyhow!("DEVICE_KEY_SEED must not be empty"));
    }
    let mut hasher = Sha256::new();
    hasher.update(DEVICE_KEY_CONTEXT);
    hasher.update(seed.as_bytes());
    let secret: [u8; 32] = hasher.finalize().into();
    Ok(SigningKey::from_bytes(&secret))
}

pub fn verifying_key_from_seed(seed: &str) -> Result<VerifyingKey> {
    signing_key_from_seed(seed).map(|key| key.verifying_key())
}

pub fn verifying_key_from_bytes(bytes: &[u8]) -> Result<VerifyingKey> {
    let key: [u8; 32] = fixed(bytes.to_vec(), "device public key")?;
    VerifyingKey::from_bytes(&key)
        .map_err(|e| anyhow!("device public key is not a valid point: {}", e))
}

/// Fixed-width column value, e.g. a stored hash or signature.
pub(crate) fn fixed<const N: usize>(bytes: Vec<u8>, column: &str) -> Result<[u8; N]> {
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| anyhow!("corrupt {}: {} bytes, want {}", column, len, N))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_depends_on_previous_link() {
        let a = hash_entry(&GENESIS_HASH, b"{\"n\":1}");
        let b = hash_entry(&[1u8; 32], b"{\"n\":1}");
        assert_ne!(a, b);
    }

    #[test]
    fn signature_round_trips_and_rejects_other_hash() -> Result<()> {
        let key = signing_key_from_seed("barn-2")?;
        let hash = hash_entry(&GENESIS_HASH, b"payload");
        let sig = sign_entry(&key, &hash);
        verify_entry_signature(&key.verifying_key(), &hash, &sig)?;

        let other = hash_entry(&GENESIS_HASH, b"tampered");
        assert!(verify_entry_signature(&key.verifying_key(), &other, &sig).is_err());
        Ok(())
    }

    #[test]
    fn seed_derivation_trims_and_separates_devices() -> Result<()> {
        assert!(signing_key_from_seed("  ").is_err());
        assert_eq!(
            verifying_key_from_seed(" barn-2 ")?,
            verifying_key_from_seed("barn-2")?
        );
        assert_ne!(
            verifying_key_from_seed("barn-2")?,
            verifying_key_from_seed("barn-3")?
        );
        Ok(())
    }

    #[test]
    fn short_columns_are_reported_as_corrupt() {
        let err = fixed::<32>(vec![0u8; 31], "ledger_entries.entry_hash").unwrap_err();
        assert!(err.to_string().contains("ledger_entries.entry_hash"));
        assert!(verifying_key_from_bytes(&[1u8; 16]).is_err());
    }
}
