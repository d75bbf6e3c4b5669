//! Tweakable page cipher: XTS over Twofish or AES-256
//!
//! The profile's encryption key is split in half: the first half keys the
//! data cipher, the second half keys the tweak cipher. XTS is length
//! preserving, so a page encrypts to exactly its own size with no padding.

use aes::cipher::KeyInit;
use aes::Aes256;
use twofish::Twofish;
use xts_mode::Xts128;

use pagecrypt_core::config::CIPHER_BLOCK_SIZE;
use pagecrypt_core::{CodecError, CodecResult, PageCipher};

use crate::iv::Tweak;

enum PageXts {
    Twofish(Xts128<Twofish>),
    Aes256(Xts128<Aes256>),
}

impl PageXts {
    fn new(cipher: PageCipher, key: &[u8]) -> CodecResult<Self> {
        if key.is_empty() || key.len() % 2 != 0 {
            return Err(CodecError::KeyRejected(format!(
                "XTS needs an even, non-empty key, got {} bytes",
                key.len()
            )));
        }
        let (data_key, tweak_key) = key.split_at(key.len() / 2);
        Ok(match cipher {
            PageCipher::TwofishXts => Self::Twofish(Xts128::new(
                block_cipher::<Twofish>(data_key)?,
                block_cipher::<Twofish>(tweak_key)?,
            )),
            PageCipher::Aes256Xts => Self::Aes256(Xts128::new(
                block_cipher::<Aes256>(data_key)?,
                block_cipher::<Aes256>(tweak_key)?,
            )),
        })
    }

    fn encrypt(&self, buf: &mut [u8], tweak: Tweak) {
        match self {
            Self::Twofish(xts) => xts.encrypt_sector(buf, tweak),
            Self::Aes256(xts) => xts.encrypt_sector(buf, tweak),
        }
    }

    fn decrypt(&self, buf: &mut [u8], tweak: Tweak) {
        match self {
            Self::Twofish(xts) => xts.decrypt_sector(buf, tweak),
            Self::Aes256(xts) => xts.decrypt_sector(buf, tweak),
        }
    }
}

fn block_cipher<C: KeyInit>(key: &[u8]) -> CodecResult<C> {
    C::new_from_slice(key).map_err(|_| {
        CodecError::KeyRejected(format!(
            "block cipher cannot accept a {}-byte key",
            key.len()
        ))
    })
}

fn check_buffer(buf: &[u8]) -> CodecResult<()> {
    if buf.is_empty() || buf.len() % CIPHER_BLOCK_SIZE != 0 {
        return Err(CodecError::InvalidParameter(format!(
            "page length {} is not a positive multiple of the {}-byte cipher block",
            buf.len(),
            CIPHER_BLOCK_SIZE
        )));
    }
    Ok(())
}

/// Encrypt `buf` in place (forward XTS transform).
pub fn encrypt_in_place(
    cipher: PageCipher,
    key: &[u8],
    tweak: &Tweak,
    buf: &mut [u8],
) -> CodecResult<()> {
    check_buffer(buf)?;
    PageXts::new(cipher, key)?.encrypt(buf, *tweak);
    Ok(())
}

/// Decrypt `buf` in place (inverse XTS transform).
pub fn decrypt_in_place(
    cipher: PageCipher,
    key: &[u8],
    tweak: &Tweak,
    buf: &mut [u8],
) -> CodecResult<()> {
    check_buffer(buf)?;
    PageXts::new(cipher, key)?.decrypt(buf, *tweak);
    Ok(())
}
