//! Per-page tweak derivation
//!
//! ```text
//! tweak(n) = MAC(iv_key, be32(n))   truncated or zero-padded to 16 bytes
//! ```
//!
//! The tweak depends only on the page number and the key generation, never
//! on page contents, and is recomputed on every encrypt and decrypt. Nothing
//! is cached between calls, so pages can be tweaked from any thread.

use hmac::digest::{FixedOutputReset, KeyInit};
use hmac::Mac;
use zeroize::Zeroizing;

use pagecrypt_core::{CodecResult, IvMac};

use crate::keys::KeyHierarchy;
use crate::kprf::{CmacAes256, CmacTwofish, Kprf};
use crate::TWEAK_SIZE;

/// XTS tweak for one page under one key generation.
pub type Tweak = [u8; TWEAK_SIZE];

/// Tweak for `page_number` under the read or write generation of `keys`.
///
/// Fails with `KeyRejected` when the selected generation is not set.
pub fn iv_for_page(keys: &KeyHierarchy, page_number: u32, use_write_key: bool) -> CodecResult<Tweak> {
    let material = keys.keys(use_write_key)?;
    tweak_for_page(keys.profile().iv_mac, material.iv_key(), page_number)
}

/// Tweak for `page_number` from a raw IV-derivation key.
pub fn tweak_for_page(mac: IvMac, iv_key: &[u8], page_number: u32) -> CodecResult<Tweak> {
    match mac {
        IvMac::CmacTwofish => mac_tweak::<CmacTwofish>(iv_key, page_number),
        IvMac::CmacAes256 => mac_tweak::<CmacAes256>(iv_key, page_number),
    }
}

fn mac_tweak<M>(iv_key: &[u8], page_number: u32) -> CodecResult<Tweak>
where
    M: Mac + KeyInit + FixedOutputReset,
{
    let mut prf = Kprf::<M>::keyed(iv_key)?;
    prf.update(&page_number.to_be_bytes())?;

    let mut tag = Zeroizing::new(vec![0u8; prf.output_len()]);
    prf.finalize_into(&mut tag)?;

    let mut tweak = [0u8; TWEAK_SIZE];
    let n = tag.len().min(TWEAK_SIZE);
    tweak[..n].copy_from_slice(&tag[..n]);
    Ok(tweak)
}
