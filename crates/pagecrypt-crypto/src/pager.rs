//! Host side of the codec: page stores and the encrypted pager
//!
//! A [`PageStore`] holds raw (encrypted) pages numbered from 1. The
//! [`EncryptedPager`] sits between a store and its callers, decrypting on
//! load and encrypting on store, and drives the rekey protocol:
//!
//! ```text
//! generate_write_key(new)      read = old, write = new
//! for each page: decrypt(old) -> encrypt(new) into a staged batch
//! store.write_batch(staged)    all pages or none
//! set_write_is_read()          read = write = new
//! ```
//!
//! Any failure before the batch lands drops the write key and leaves the
//! store exactly as it was.

use zeroize::Zeroizing;

use pagecrypt_core::{CodecFormatProfile, PagecryptError, PagecryptResult};

use crate::codec::Codec;
use crate::keys::KeyPhase;

/// Storage for fixed-size raw pages, numbered from 1.
pub trait PageStore {
    fn page_size(&self) -> usize;

    fn page_count(&self) -> u32;

    /// Copy page `page_number` into `buf` (exactly `page_size` bytes).
    fn read_page(&self, page_number: u32, buf: &mut [u8]) -> PagecryptResult<()>;

    /// Overwrite an existing page, or append when `page_number` is one past
    /// the end.
    fn write_page(&mut self, page_number: u32, data: &[u8]) -> PagecryptResult<()>;

    /// Write several existing pages atomically: if any page is rejected, no
    /// page is written.
    fn write_batch(&mut self, pages: &[(u32, Vec<u8>)]) -> PagecryptResult<()>;
}

/// In-memory page store over one contiguous buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryPageStore {
    page_size: usize,
    data: Vec<u8>,
}

impl MemoryPageStore {
    pub fn new(page_size: usize) -> PagecryptResult<Self> {
        Self::from_bytes(page_size, Vec::new())
    }

    /// Wrap an image whose length is a whole number of pages.
    pub fn from_bytes(page_size: usize, data: Vec<u8>) -> PagecryptResult<Self> {
        if page_size == 0 {
            return Err(PagecryptError::Store("page size must be non-zero".into()));
        }
        if data.len() % page_size != 0 {
            return Err(PagecryptError::Store(format!(
                "image of {} bytes is not a whole number of {page_size}-byte pages",
                data.len()
            )));
        }
        if data.len() / page_size > u32::MAX as usize {
            return Err(PagecryptError::Store(format!(
                "image of {} bytes has more pages than can be numbered",
                data.len()
            )));
        }
        Ok(Self { page_size, data })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    fn range(&self, page_number: u32) -> PagecryptResult<std::ops::Range<usize>> {
        if page_number == 0 || page_number > self.page_count() {
            return Err(PagecryptError::Store(format!(
                "page {page_number} out of range (1..={})",
                self.page_count()
            )));
        }
        let start = (page_number as usize - 1) * self.page_size;
        Ok(start..start + self.page_size)
    }

    fn check_len(&self, len: usize) -> PagecryptResult<()> {
        if len != self.page_size {
            return Err(PagecryptError::Store(format!(
                "expected a {}-byte page, got {len} bytes",
                self.page_size
            )));
        }
        Ok(())
    }
}

impl PageStore for MemoryPageStore {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn page_count(&self) -> u32 {
        (self.data.len() / self.page_size) as u32
    }

    fn read_page(&self, page_number: u32, buf: &mut [u8]) -> PagecryptResult<()> {
        self.check_len(buf.len())?;
        let range = self.range(page_number)?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write_page(&mut self, page_number: u32, data: &[u8]) -> PagecryptResult<()> {
        self.check_len(data.len())?;
        if Some(page_number) == self.page_count().checked_add(1) {
            self.data.extend_from_slice(data);
            return Ok(());
        }
        let range = self.range(page_number)?;
        self.data[range].copy_from_slice(data);
        Ok(())
    }

    fn write_batch(&mut self, pages: &[(u32, Vec<u8>)]) -> PagecryptResult<()> {
        for (page_number, data) in pages {
            self.check_len(data.len())?;
            self.range(*page_number)?;
        }
        for (page_number, data) in pages {
            let range = self.range(*page_number)?;
            self.data[range].copy_from_slice(data);
        }
        Ok(())
    }
}

/// Outcome of a completed rekey.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RekeyReport {
    pub pages: u32,
}

/// Page store wrapped with a codec.
#[derive(Debug)]
pub struct EncryptedPager<S> {
    store: S,
    codec: Codec,
}

impl<S: PageStore> EncryptedPager<S> {
    /// Wrap `store` with `codec`, matching the codec to the store's page size.
    pub fn new(store: S, mut codec: Codec) -> PagecryptResult<Self> {
        codec.set_page_size(store.page_size())?;
        Ok(Self { store, codec })
    }

    /// Open an encrypted store with its passphrase (read-only keys).
    pub fn open(store: S, profile: CodecFormatProfile, passphrase: &[u8]) -> PagecryptResult<Self> {
        let mut codec = Codec::new(profile)?;
        codec.unlock(passphrase)?;
        Self::new(store, codec)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn page_count(&self) -> u32 {
        self.store.page_count()
    }

    /// Load and decrypt one page.
    pub fn read_page(&mut self, page_number: u32) -> PagecryptResult<Zeroizing<Vec<u8>>> {
        let mut buf = Zeroizing::new(vec![0u8; self.store.page_size()]);
        self.store.read_page(page_number, &mut buf)?;
        self.codec.decrypt(page_number, &mut buf)?;
        Ok(buf)
    }

    /// Encrypt and store one page.
    ///
    /// A read-only connection is promoted to using its read key for writes
    /// on the first write.
    pub fn write_page(&mut self, page_number: u32, plaintext: &[u8]) -> PagecryptResult<()> {
        if self.codec.phase() == KeyPhase::ReadOnly {
            self.codec.set_read_is_write()?;
        }
        let ciphertext = self.codec.encrypt(page_number, plaintext, true)?;
        self.store.write_page(page_number, ciphertext)
    }

    /// Encrypt every page of a plaintext store into this one, in order.
    pub fn import_plaintext<P: PageStore>(&mut self, source: &P) -> PagecryptResult<u32> {
        self.check_page_size(source.page_size())?;
        let mut buf = Zeroizing::new(vec![0u8; source.page_size()]);
        for page_number in 1..=source.page_count() {
            source.read_page(page_number, &mut buf)?;
            self.write_page(page_number, &buf)?;
        }
        tracing::debug!(pages = source.page_count(), "imported plaintext pages");
        Ok(source.page_count())
    }

    /// Decrypt every page of this store into `dest`, in order.
    pub fn export_plaintext<P: PageStore>(&mut self, dest: &mut P) -> PagecryptResult<u32> {
        self.check_page_size(dest.page_size())?;
        for page_number in 1..=self.page_count() {
            let plaintext = self.read_page(page_number)?;
            dest.write_page(page_number, &plaintext)?;
        }
        tracing::debug!(pages = self.page_count(), "exported plaintext pages");
        Ok(self.page_count())
    }

    /// Re-encrypt every page under `new_passphrase`.
    ///
    /// On success the codec is `Stable` on the new key. On failure the write
    /// key is dropped, the codec returns to its prior phase and the store is
    /// left unmodified.
    pub fn rekey(&mut self, new_passphrase: &[u8]) -> PagecryptResult<RekeyReport> {
        let prior = self.codec.phase();
        match self.try_rekey(new_passphrase) {
            Ok(report) => {
                tracing::info!(pages = report.pages, "rekey complete");
                Ok(report)
            }
            Err(e) => {
                tracing::warn!(error = %e, "rekey aborted, keeping previous key");
                self.restore_phase(prior);
                Err(e)
            }
        }
    }

    fn try_rekey(&mut self, new_passphrase: &[u8]) -> PagecryptResult<RekeyReport> {
        if self.codec.phase() == KeyPhase::ReadOnly {
            self.codec.set_read_is_write()?;
        }
        self.codec.generate_write_key(new_passphrase)?;

        let pages = self.page_count();
        let mut staged = Vec::with_capacity(pages as usize);
        for page_number in 1..=pages {
            let plaintext = self.read_page(page_number)?;
            let ciphertext = self.codec.encrypt(page_number, &plaintext, true)?;
            staged.push((page_number, ciphertext.to_vec()));
        }

        self.store.write_batch(&staged)?;
        self.codec.set_write_is_read()?;
        Ok(RekeyReport { pages })
    }

    fn restore_phase(&mut self, prior: KeyPhase) {
        self.codec.drop_write_key();
        if prior == KeyPhase::Stable {
            if let Err(e) = self.codec.set_read_is_write() {
                tracing::warn!(error = %e, "could not restore write key after aborted rekey");
            }
        }
    }

    fn check_page_size(&self, other: usize) -> PagecryptResult<()> {
        if other != self.store.page_size() {
            return Err(PagecryptError::Store(format!(
                "page size mismatch: {other} vs {}",
                self.store.page_size()
            )));
        }
        Ok(())
    }
}
