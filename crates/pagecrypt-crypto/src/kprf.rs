//! Keyed PRF adapter over RustCrypto MACs
//!
//! Both the key-derivation engine (HMAC) and the page IV engine (CMAC) drive a
//! MAC through the same three steps: set a key, feed bytes, take the tag. The
//! adapter owns the keyed MAC state for exactly one scope. Dropping it, or
//! calling [`Kprf::clear_key`], releases that state, so no key residue carries
//! over into an unrelated call.

use std::any::type_name;

use cmac::Cmac;
use hmac::digest::{FixedOutputReset, KeyInit, OutputSizeUser};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use zeroize::Zeroize;

use pagecrypt_core::{CodecError, CodecResult};

pub type HmacSha1 = Hmac<Sha1>;
pub type HmacSha256 = Hmac<Sha256>;
pub type CmacTwofish = Cmac<twofish::Twofish>;
pub type CmacAes256 = Cmac<aes::Aes256>;

/// A MAC behind the `set_key` / `update` / `final` contract.
pub struct Kprf<M> {
    mac: Option<M>,
}

impl<M> Kprf<M>
where
    M: Mac + KeyInit + FixedOutputReset,
{
    pub fn new() -> Self {
        Self { mac: None }
    }

    /// Create an adapter already keyed with `key`.
    pub fn keyed(key: &[u8]) -> CodecResult<Self> {
        let mut prf = Self::new();
        prf.set_key(key)?;
        Ok(prf)
    }

    /// Native tag length of the underlying MAC.
    pub fn output_len(&self) -> usize {
        <M as OutputSizeUser>::output_size()
    }

    /// Key the MAC, replacing any previous key.
    ///
    /// The primitive's `InvalidLength` is reported as `KeyRejected`.
    pub fn set_key(&mut self, key: &[u8]) -> CodecResult<()> {
        self.clear_key();
        let mac = <M as Mac>::new_from_slice(key).map_err(|_| {
            CodecError::KeyRejected(format!(
                "{} cannot accept keys of length {}",
                short_name::<M>(),
                key.len()
            ))
        })?;
        self.mac = Some(mac);
        Ok(())
    }

    pub fn update(&mut self, data: &[u8]) -> CodecResult<()> {
        let mac = self.mac.as_mut().ok_or_else(unkeyed)?;
        Mac::update(mac, data);
        Ok(())
    }

    /// Write the tag into `out` and reset the MAC for the next message under
    /// the same key. `out` must be exactly [`Kprf::output_len`] bytes.
    pub fn finalize_into(&mut self, out: &mut [u8]) -> CodecResult<()> {
        if out.len() != self.output_len() {
            return Err(CodecError::InvalidParameter(format!(
                "MAC output buffer is {} bytes, expected {}",
                out.len(),
                self.output_len()
            )));
        }
        let mac = self.mac.as_mut().ok_or_else(unkeyed)?;
        let mut tag = mac.finalize_reset().into_bytes();
        out.copy_from_slice(&tag);
        tag.as_mut_slice().zeroize();
        Ok(())
    }

    pub fn has_key(&self) -> bool {
        self.mac.is_some()
    }

    pub fn clear_key(&mut self) {
        self.mac = None;
    }
}

impl<M> Default for Kprf<M>
where
    M: Mac + KeyInit + FixedOutputReset,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Drop for Kprf<M> {
    fn drop(&mut self) {
        self.mac = None;
    }
}

impl<M> std::fmt::Debug for Kprf<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kprf")
            .field("mac", &short_name::<M>())
            .field("keyed", &self.mac.is_some())
            .finish()
    }
}

fn unkeyed() -> CodecError {
    CodecError::KeyRejected("MAC used before a key was set".into())
}

fn short_name<M>() -> &'static str {
    let full = type_name::<M>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag<M: Mac + KeyInit + FixedOutputReset>(prf: &mut Kprf<M>, msg: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; prf.output_len()];
        prf.update(msg).unwrap();
        prf.finalize_into(&mut out).unwrap();
        out
    }

    #[test]
    fn test_output_lengths() {
        assert_eq!(Kprf::<HmacSha1>::new().output_len(), 20);
        assert_eq!(Kprf::<HmacSha256>::new().output_len(), 32);
        assert_eq!(Kprf::<CmacTwofish>::new().output_len(), 16);
        assert_eq!(Kprf::<CmacAes256>::new().output_len(), 16);
    }

    #[test]
    fn test_hmac_sha1_rfc2202_case_2() {
        let mut prf = Kprf::<HmacSha1>::keyed(b"Jefe").unwrap();
        let out = tag(&mut prf, b"what do ya want for nothing?");
        assert_eq!(
            out,
            [
                0xef, 0xfc, 0xdf, 0x6a, 0xe5, 0xeb, 0x2f, 0xa2, 0xd2, 0x74, 0x16, 0xd5, 0xf1,
                0x84, 0xdf, 0x9c, 0x25, 0x9a, 0x7c, 0x79
            ]
        );
    }

    #[test]
    fn test_finalize_resets_for_next_message() {
        let mut prf = Kprf::<HmacSha256>::keyed(b"key").unwrap();
        let first = tag(&mut prf, b"message");
        let second = tag(&mut prf, b"message");
        assert_eq!(first, second, "tag must not depend on the previous message");
    }

    #[test]
    fn test_cmac_rejects_unsupported_key_length() {
        let err = Kprf::<CmacAes256>::keyed(&[0u8; 20]).unwrap_err();
        assert!(matches!(err, CodecError::KeyRejected(_)));
    }

    #[test]
    fn test_unkeyed_use_is_rejected() {
        let mut prf = Kprf::<HmacSha1>::new();
        assert!(matches!(
            prf.update(b"data"),
            Err(CodecError::KeyRejected(_))
        ));

        let mut out = [0u8; 20];
        assert!(matches!(
            prf.finalize_into(&mut out),
            Err(CodecError::KeyRejected(_))
        ));
    }

    #[test]
    fn test_clear_key() {
        let mut prf = Kprf::<CmacTwofish>::keyed(&[7u8; 32]).unwrap();
        assert!(prf.has_key());
        prf.clear_key();
        assert!(!prf.has_key());
    }

    #[test]
    fn test_wrong_output_buffer_size() {
        let mut prf = Kprf::<HmacSha1>::keyed(b"k").unwrap();
        let mut out = [0u8; 32];
        assert!(matches!(
            prf.finalize_into(&mut out),
            Err(CodecError::InvalidParameter(_))
        ));
    }
}
