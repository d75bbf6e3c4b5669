//! Key derivation: PBKDF2 passphrase stretching over a keyed PRF
//!
//! ```text
//! T_i = U_1 ^ U_2 ^ ... ^ U_c
//! U_1 = PRF(passphrase, salt || be32(i))
//! U_j = PRF(passphrase, U_{j-1})
//! key = T_1 || T_2 || ...   (last block truncated to the requested length)
//! ```

use hmac::digest::{FixedOutputReset, KeyInit};
use hmac::Mac;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use pagecrypt_core::{CodecError, CodecResult, KdfMac};

use crate::kprf::{HmacSha1, HmacSha256, Kprf};

/// Key material produced by the derivation engine. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: Vec<u8>,
}

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("len", &self.bytes.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive `output_len` bytes from a passphrase with PBKDF2 over the MAC `M`.
///
/// Fails with `InvalidParameter` when `iterations` is zero, and with
/// `KeyRejected` when `M` cannot take the passphrase as a key.
pub fn derive_key<M>(
    passphrase: &[u8],
    salt: &[u8],
    iterations: u32,
    output_len: usize,
) -> CodecResult<DerivedKey>
where
    M: Mac + KeyInit + FixedOutputReset,
{
    let mut bytes = vec![0u8; output_len];
    derive_key_into::<M>(passphrase, salt, iterations, &mut bytes)?;
    Ok(DerivedKey { bytes })
}

/// Fill `out` with PBKDF2 output.
pub fn derive_key_into<M>(
    passphrase: &[u8],
    salt: &[u8],
    iterations: u32,
    out: &mut [u8],
) -> CodecResult<()>
where
    M: Mac + KeyInit + FixedOutputReset,
{
    out.zeroize();
    if iterations == 0 {
        return Err(CodecError::InvalidParameter(
            "PBKDF2 iteration count must be non-zero".into(),
        ));
    }

    let mut prf = Kprf::<M>::new();
    prf.set_key(passphrase).map_err(|_| {
        CodecError::KeyRejected(format!(
            "PBKDF2 cannot accept passphrases of length {}",
            passphrase.len()
        ))
    })?;

    let block_len = prf.output_len();
    let blocks = out.len().div_ceil(block_len);
    if blocks > u32::MAX as usize {
        return Err(CodecError::InvalidParameter(format!(
            "PBKDF2 output of {} bytes exceeds the block counter",
            out.len()
        )));
    }

    tracing::debug!(
        iterations,
        output_len = out.len(),
        block_len,
        "deriving key material"
    );

    let mut u = Zeroizing::new(vec![0u8; block_len]);
    for (index, block) in out.chunks_mut(block_len).enumerate() {
        let counter = index as u32 + 1;

        prf.update(salt)?;
        prf.update(&counter.to_be_bytes())?;
        prf.finalize_into(&mut u)?;
        xor_into(block, &u);

        for _ in 1..iterations {
            prf.update(&u)?;
            prf.finalize_into(&mut u)?;
            xor_into(block, &u);
        }
    }

    prf.clear_key();
    Ok(())
}

/// Derive with the PRF named by a format profile.
pub fn derive_with(
    mac: KdfMac,
    passphrase: &[u8],
    salt: &[u8],
    iterations: u32,
    output_len: usize,
) -> CodecResult<DerivedKey> {
    match mac {
        KdfMac::HmacSha1 => derive_key::<HmacSha1>(passphrase, salt, iterations, output_len),
        KdfMac::HmacSha256 => derive_key::<HmacSha256>(passphrase, salt, iterations, output_len),
    }
}

fn xor_into(acc: &mut [u8], u: &[u8]) {
    for (a, b) in acc.iter_mut().zip(u) {
        *a ^= b;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kprf::CmacAes256;
    use proptest::prelude::*;
    use sha1::Sha1;
    use sha2::Sha256;

    const LEGACY_SALT: &[u8] = b"&g#nB'9]";

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn test_rfc6070_vectors() {
        let cases: [(u32, &str); 3] = [
            (1, "0c60c80f961f0e71f3a9b524af6012062fe037a6"),
            (2, "ea6c014dc72d6f8ccd1ed92ace1d41f0d8de8957"),
            (4096, "4b007901b765489abead49d926f721d065a429c1"),
        ];
        for (iterations, expected) in cases {
            let key = derive_key::<HmacSha1>(b"password", b"salt", iterations, 20).unwrap();
            assert_eq!(hex(key.as_bytes()), expected, "c = {iterations}");
        }
    }

    #[test]
    fn test_rfc6070_multi_block() {
        let key = derive_key::<HmacSha1>(
            b"passwordPASSWORDpassword",
            b"saltSALTsaltSALTsaltSALTsaltSALTsalt",
            4096,
            25,
        )
        .unwrap();
        assert_eq!(
            hex(key.as_bytes()),
            "3d2eec4fe41c849b80c8d83662c0e44a8b291a964cf2f07038"
        );
    }

    #[test]
    fn test_legacy_scenario_64_byte_key() {
        let key1 = derive_key::<HmacSha1>(b"correct-password", LEGACY_SALT, 10_000, 64).unwrap();
        let key2 = derive_key::<HmacSha1>(b"correct-password", LEGACY_SALT, 10_000, 64).unwrap();

        assert_eq!(key1.len(), 64);
        assert_eq!(key1.as_bytes(), key2.as_bytes(), "KDF must be deterministic");
        assert_ne!(
            &key1.as_bytes()[..32],
            &key1.as_bytes()[32..],
            "read key and IV key halves must differ"
        );
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let err = derive_key::<HmacSha1>(b"pw", LEGACY_SALT, 0, 32).unwrap_err();
        assert!(matches!(err, CodecError::InvalidParameter(_)));
    }

    #[test]
    fn test_unsupported_passphrase_length_is_key_rejected() {
        let err = derive_key::<CmacAes256>(b"short", LEGACY_SALT, 1, 32).unwrap_err();
        match err {
            CodecError::KeyRejected(msg) => {
                assert!(msg.contains("PBKDF2"), "engine must report its own error: {msg}")
            }
            other => panic!("expected KeyRejected, got {other:?}"),
        }
    }

    #[test]
    fn test_cmac_prf_with_valid_key_length() {
        let key = derive_key::<CmacAes256>(&[9u8; 32], LEGACY_SALT, 3, 40).unwrap();
        assert_eq!(key.len(), 40);
    }

    #[test]
    fn test_zero_length_output() {
        let key = derive_key::<HmacSha1>(b"pw", LEGACY_SALT, 5, 0).unwrap();
        assert!(key.is_empty());
    }

    #[test]
    fn test_derive_with_dispatches_on_profile_mac() {
        let sha1 = derive_with(KdfMac::HmacSha1, b"pw", LEGACY_SALT, 2, 32).unwrap();
        let sha256 = derive_with(KdfMac::HmacSha256, b"pw", LEGACY_SALT, 2, 32).unwrap();
        assert_eq!(
            sha1.as_bytes(),
            derive_key::<HmacSha1>(b"pw", LEGACY_SALT, 2, 32).unwrap().as_bytes()
        );
        assert_ne!(sha1.as_bytes(), sha256.as_bytes());
    }

    #[test]
    fn test_debug_redacts_bytes() {
        let key = derive_key::<HmacSha1>(b"pw", LEGACY_SALT, 1, 8).unwrap();
        let rendered = format!("{key:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains(&hex(key.as_bytes())));
    }

    proptest! {
        #[test]
        fn matches_reference_pbkdf2_sha1(
            passphrase in proptest::collection::vec(any::<u8>(), 0..64),
            salt in proptest::collection::vec(any::<u8>(), 0..32),
            iterations in 1u32..20,
            len in 0usize..100,
        ) {
            let ours = derive_key::<HmacSha1>(&passphrase, &salt, iterations, len).unwrap();
            let mut reference = vec![0u8; len];
            pbkdf2::pbkdf2_hmac::<Sha1>(&passphrase, &salt, iterations, &mut reference);
            prop_assert_eq!(ours.as_bytes(), reference.as_slice());
        }

        #[test]
        fn matches_reference_pbkdf2_sha256(
            passphrase in proptest::collection::vec(any::<u8>(), 0..64),
            salt in proptest::collection::vec(any::<u8>(), 0..32),
            iterations in 1u32..20,
            len in 0usize..100,
        ) {
            let ours = derive_key::<HmacSha256>(&passphrase, &salt, iterations, len).unwrap();
            let mut reference = vec![0u8; len];
            pbkdf2::pbkdf2_hmac::<Sha256>(&passphrase, &salt, iterations, &mut reference);
            prop_assert_eq!(ours.as_bytes(), reference.as_slice());
        }

        #[test]
        fn output_length_and_determinism(
            passphrase in proptest::collection::vec(any::<u8>(), 0..32),
            iterations in 1u32..5,
            len in 0usize..200,
        ) {
            let a = derive_key::<HmacSha1>(&passphrase, LEGACY_SALT, iterations, len).unwrap();
            let b = derive_key::<HmacSha1>(&passphrase, LEGACY_SALT, iterations, len).unwrap();
            prop_assert_eq!(a.len(), len);
            prop_assert_eq!(a.as_bytes(), b.as_bytes());
        }
    }
}
