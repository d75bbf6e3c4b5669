//! pagecrypt-crypto: transparent page encryption for paged database files
//!
//! Architecture: PBKDF2-derived keys, CMAC page tweaks, XTS page cipher
//!
//! Pipeline: page plaintext → tweak = CMAC(iv_key, be32(page)) → XTS(cipher_key, tweak) → store
//!
//! Key hierarchy:
//! ```text
//! Passphrase
//!   └── PBKDF2-HMAC (profile salt, iterations) → key_size + iv_key_size bytes
//!       ├── Cipher Key  [0, key_size)         split in half: XTS data key | XTS tweak key
//!       └── IV Key      [key_size, derived)   CMAC key for per-page tweaks
//! ```
//!
//! A connection holds a read generation and a write generation of that
//! material. Rekeying derives a new write generation, re-encrypts every page
//! and then commits it as the read generation (see [`keys`] and [`pager`]).

pub mod cipher;
pub mod codec;
pub mod iv;
pub mod kdf;
pub mod keys;
pub mod kprf;
pub mod pager;

pub use codec::{Codec, PageOp};
pub use iv::{iv_for_page, tweak_for_page, Tweak};
pub use kdf::{derive_key, derive_with, DerivedKey};
pub use keys::{KeyHierarchy, KeyMaterial, KeyPhase};
pub use kprf::Kprf;
pub use pager::{EncryptedPager, MemoryPageStore, PageStore, RekeyReport};

/// Size of an XTS tweak (one cipher block)
pub const TWEAK_SIZE: usize = 16;
