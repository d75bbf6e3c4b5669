//! Page codec: encrypt/decrypt one fixed-size page
//!
//! The codec owns a connection's [`KeyHierarchy`] and a staging buffer sized
//! to the profile's maximum page. Encryption copies the page into the staging
//! buffer and transforms it there, so the host's plaintext buffer is never
//! touched. Decryption works in place and always uses the read generation.

use std::sync::Arc;

use zeroize::Zeroizing;

use pagecrypt_core::config::{CIPHER_BLOCK_SIZE, DEFAULT_PAGE_SIZE};
use pagecrypt_core::{CodecError, CodecFormatProfile, CodecResult};

use crate::cipher;
use crate::iv::{iv_for_page, Tweak};
use crate::keys::{KeyHierarchy, KeyPhase};

/// What the host page store is doing with a page buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOp {
    /// Page read from storage: decrypt with the read key
    Load,
    /// Page written to the database file: encrypt with the write key
    Store,
    /// Page written to the rollback journal: encrypt with the read key, so
    /// rollback can restore it whatever happens to an in-flight rekey
    Journal,
}

pub struct Codec {
    profile: Arc<CodecFormatProfile>,
    keys: KeyHierarchy,
    page_size: usize,
    scratch: Zeroizing<Vec<u8>>,
}

impl Codec {
    /// A codec with no keys (`Initial`).
    pub fn new(profile: CodecFormatProfile) -> CodecResult<Self> {
        let profile = Arc::new(profile);
        let keys = KeyHierarchy::new(Arc::clone(&profile))?;
        Ok(Self::with_keys(profile, keys))
    }

    /// Attach a passphrase to a database: derive one generation and use it
    /// for both reading and writing (`Stable`).
    pub fn with_passphrase(profile: CodecFormatProfile, passphrase: &[u8]) -> CodecResult<Self> {
        let mut codec = Self::new(profile)?;
        codec.keys.unlock(passphrase)?;
        codec.keys.set_read_is_write()?;
        Ok(codec)
    }

    fn with_keys(profile: Arc<CodecFormatProfile>, keys: KeyHierarchy) -> Self {
        let page_size = DEFAULT_PAGE_SIZE.min(profile.max_page_size);
        let scratch = Zeroizing::new(vec![0u8; profile.max_page_size]);
        Self {
            profile,
            keys,
            page_size,
            scratch,
        }
    }

    /// Codec for a cloned connection. Committed keys are shared; a write key
    /// from an in-flight rekey is not carried over.
    pub fn clone_for_connection(&self) -> Self {
        let mut codec = Self::with_keys(Arc::clone(&self.profile), self.keys.snapshot());
        codec.page_size = self.page_size;
        codec
    }

    pub fn profile(&self) -> &CodecFormatProfile {
        &self.profile
    }

    pub fn keys(&self) -> &KeyHierarchy {
        &self.keys
    }

    pub fn phase(&self) -> KeyPhase {
        self.keys.phase()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Record the host's page size. Every later encrypt and decrypt must be
    /// given exactly this many bytes. Fails with `PageTooLarge` if it exceeds
    /// the staging buffer.
    pub fn set_page_size(&mut self, page_size: usize) -> CodecResult<()> {
        self.check_len(page_size)?;
        if page_size == 0 || page_size % CIPHER_BLOCK_SIZE != 0 {
            return Err(CodecError::InvalidParameter(format!(
                "page size {page_size} is not a positive multiple of {CIPHER_BLOCK_SIZE}"
            )));
        }
        self.page_size = page_size;
        Ok(())
    }

    pub fn has_read_key(&self) -> bool {
        self.keys.has_read_key()
    }

    pub fn has_write_key(&self) -> bool {
        self.keys.has_write_key()
    }

    pub fn unlock(&mut self, passphrase: &[u8]) -> CodecResult<()> {
        self.keys.unlock(passphrase)
    }

    pub fn generate_write_key(&mut self, passphrase: &[u8]) -> CodecResult<()> {
        self.keys.generate_write_key(passphrase)
    }

    pub fn drop_write_key(&mut self) {
        self.keys.drop_write_key();
    }

    pub fn set_write_is_read(&mut self) -> CodecResult<()> {
        self.keys.set_write_is_read()
    }

    pub fn set_read_is_write(&mut self) -> CodecResult<()> {
        self.keys.set_read_is_write()
    }

    pub fn iv_for_page(&self, page_number: u32, use_write_key: bool) -> CodecResult<Tweak> {
        iv_for_page(&self.keys, page_number, use_write_key)
    }

    /// Encrypt a page under the write key (`use_write_key`) or the read key.
    ///
    /// Returns the ciphertext, staged in the codec's buffer and valid until
    /// the next call. It has the same length as `plaintext`.
    pub fn encrypt(
        &mut self,
        page_number: u32,
        plaintext: &[u8],
        use_write_key: bool,
    ) -> CodecResult<&[u8]> {
        check_page_number(page_number)?;
        self.check_page_len(plaintext.len())?;

        let tweak = self.iv_for_page(page_number, use_write_key)?;
        let key = self.keys.keys(use_write_key)?.cipher_key();

        let staged = &mut self.scratch[..plaintext.len()];
        staged.copy_from_slice(plaintext);
        if let Err(e) = cipher::encrypt_in_place(self.profile.cipher, key, &tweak, staged) {
            zeroize::Zeroize::zeroize(staged);
            return Err(e);
        }
        Ok(staged)
    }

    /// Decrypt a page in place with the read key.
    pub fn decrypt(&mut self, page_number: u32, page: &mut [u8]) -> CodecResult<()> {
        check_page_number(page_number)?;
        self.check_page_len(page.len())?;

        let tweak = self.iv_for_page(page_number, false)?;
        let key = self.keys.read_keys()?.cipher_key();
        cipher::decrypt_in_place(self.profile.cipher, key, &tweak, page)
    }

    /// Transform `page` in place for the given host operation.
    pub fn process(&mut self, page_number: u32, page: &mut [u8], op: PageOp) -> CodecResult<()> {
        match op {
            PageOp::Load => self.decrypt(page_number, page),
            PageOp::Store | PageOp::Journal => {
                let use_write_key = op == PageOp::Store;
                let ciphertext = self.encrypt(page_number, page, use_write_key)?;
                page.copy_from_slice(ciphertext);
                Ok(())
            }
        }
    }

    fn check_len(&self, len: usize) -> CodecResult<()> {
        if len > self.scratch.len() {
            return Err(CodecError::PageTooLarge {
                len,
                max: self.scratch.len(),
            });
        }
        Ok(())
    }

    fn check_page_len(&self, len: usize) -> CodecResult<()> {
        self.check_len(len)?;
        if len != self.page_size {
            return Err(CodecError::InvalidParameter(format!(
                "page is {len} bytes, codec page size is {}",
                self.page_size
            )));
        }
        Ok(())
    }
}

fn check_page_number(page_number: u32) -> CodecResult<()> {
    if page_number == 0 {
        return Err(CodecError::InvalidParameter(
            "page numbers start at 1".into(),
        ));
    }
    Ok(())
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec")
            .field("keys", &self.keys)
            .field("page_size", &self.page_size)
            .field("max_page_size", &self.scratch.len())
            .finish()
    }
}
