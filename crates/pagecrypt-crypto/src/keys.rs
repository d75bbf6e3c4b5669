//! Key hierarchy: passphrase → read/write key generations, rekey lifecycle
//!
//! One passphrase derivation yields a *generation*: an XTS encryption key and
//! a CMAC IV-derivation key, split from a single PBKDF2 block:
//!
//! ```text
//! PBKDF2(passphrase, profile.salt, profile.iterations, key_size + iv_key_size)
//!   ├── [0, key_size)                        → encryption key
//!   └── [key_size, key_size + iv_key_size)   → IV-derivation key
//! ```
//!
//! The hierarchy holds a read generation and a write generation. Decryption
//! always uses the read generation; the write generation only diverges from
//! it while a rekey is in flight:
//!
//! ```text
//! Initial  ── unlock ─────────────▶ ReadOnly
//! ReadOnly ── set_read_is_write ──▶ Stable
//! ReadOnly ── generate_write_key ─▶ Rekeying
//! Stable   ── generate_write_key ─▶ Rekeying
//! Rekeying ── set_write_is_read ──▶ Stable     (commit)
//! Rekeying ── drop_write_key ─────▶ ReadOnly   (abort)
//! Stable   ── drop_write_key ─────▶ ReadOnly
//! ```

use std::sync::Arc;

use zeroize::{Zeroize, ZeroizeOnDrop};

use pagecrypt_core::{CodecError, CodecFormatProfile, CodecResult};

use crate::kdf::derive_with;

/// One key generation: encryption key and IV-derivation key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    cipher_key: Vec<u8>,
    iv_key: Vec<u8>,
}

impl KeyMaterial {
    /// Derive a generation from a passphrase under `profile`.
    pub fn derive(profile: &CodecFormatProfile, passphrase: &[u8]) -> CodecResult<Self> {
        let block = derive_with(
            profile.kdf_mac,
            passphrase,
            &profile.salt,
            profile.iterations,
            profile.derived_len(),
        )?;
        let (cipher_key, iv_key) = block.as_bytes().split_at(profile.key_size);
        Ok(Self {
            cipher_key: cipher_key.to_vec(),
            iv_key: iv_key.to_vec(),
        })
    }

    pub fn from_parts(cipher_key: &[u8], iv_key: &[u8]) -> Self {
        Self {
            cipher_key: cipher_key.to_vec(),
            iv_key: iv_key.to_vec(),
        }
    }

    pub fn cipher_key(&self) -> &[u8] {
        &self.cipher_key
    }

    pub fn iv_key(&self) -> &[u8] {
        &self.iv_key
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("cipher_key", &"[REDACTED]")
            .field("iv_key", &"[REDACTED]")
            .finish()
    }
}

/// Observable phase of the key hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPhase {
    /// No keys; nothing can be encrypted or decrypted
    Initial,
    /// Read key only; pages can be decrypted
    ReadOnly,
    /// Read and write keys differ: a rekey is in progress
    Rekeying,
    /// Read and write keys are the same generation
    Stable,
}

impl KeyPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::ReadOnly => "read-only",
            Self::Rekeying => "rekeying",
            Self::Stable => "stable",
        }
    }
}

impl std::fmt::Display for KeyPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Generations are shared by Arc and never mutated in place: every transition
// swaps in a new state, so a snapshot taken by a cloned connection keeps
// seeing the generation it was cloned with.
#[derive(Clone)]
enum KeyState {
    Initial,
    ReadOnly {
        read: Arc<KeyMaterial>,
    },
    Rekeying {
        read: Arc<KeyMaterial>,
        write: Arc<KeyMaterial>,
    },
    Stable {
        keys: Arc<KeyMaterial>,
    },
}

/// Read/write key slots of one database connection.
#[derive(Clone)]
pub struct KeyHierarchy {
    profile: Arc<CodecFormatProfile>,
    state: KeyState,
}

impl KeyHierarchy {
    pub fn new(profile: Arc<CodecFormatProfile>) -> CodecResult<Self> {
        profile.validate()?;
        Ok(Self {
            profile,
            state: KeyState::Initial,
        })
    }

    pub fn profile(&self) -> &CodecFormatProfile {
        &self.profile
    }

    pub fn phase(&self) -> KeyPhase {
        match self.state {
            KeyState::Initial => KeyPhase::Initial,
            KeyState::ReadOnly { .. } => KeyPhase::ReadOnly,
            KeyState::Rekeying { .. } => KeyPhase::Rekeying,
            KeyState::Stable { .. } => KeyPhase::Stable,
        }
    }

    pub fn has_read_key(&self) -> bool {
        !matches!(self.state, KeyState::Initial)
    }

    pub fn has_write_key(&self) -> bool {
        matches!(
            self.state,
            KeyState::Rekeying { .. } | KeyState::Stable { .. }
        )
    }

    /// Derive the read generation from a stored or verified passphrase.
    ///
    /// `Initial → ReadOnly`. Also accepted in `ReadOnly`, replacing the read
    /// key, so a host can retry after a wrong passphrase.
    pub fn unlock(&mut self, passphrase: &[u8]) -> CodecResult<()> {
        match self.state {
            KeyState::Initial | KeyState::ReadOnly { .. } => {
                let read = Arc::new(KeyMaterial::derive(&self.profile, passphrase)?);
                self.transition("unlock", KeyState::ReadOnly { read });
                Ok(())
            }
            _ => Err(self.reject("unlock")),
        }
    }

    /// Derive a new write generation, leaving the read generation untouched.
    ///
    /// Pages already on disk stay readable under the old read key until
    /// [`KeyHierarchy::set_write_is_read`] commits the new generation.
    pub fn generate_write_key(&mut self, passphrase: &[u8]) -> CodecResult<()> {
        let read = match &self.state {
            KeyState::Initial => return Err(self.reject("generate_write_key")),
            KeyState::ReadOnly { read } | KeyState::Rekeying { read, .. } => Arc::clone(read),
            KeyState::Stable { keys } => Arc::clone(keys),
        };
        let write = Arc::new(KeyMaterial::derive(&self.profile, passphrase)?);
        self.transition("generate_write_key", KeyState::Rekeying { read, write });
        Ok(())
    }

    /// Discard the write generation (abort a rekey). Idempotent.
    pub fn drop_write_key(&mut self) {
        let next = match &self.state {
            KeyState::Rekeying { read, .. } => KeyState::ReadOnly {
                read: Arc::clone(read),
            },
            KeyState::Stable { keys } => KeyState::ReadOnly {
                read: Arc::clone(keys),
            },
            KeyState::Initial | KeyState::ReadOnly { .. } => return,
        };
        self.transition("drop_write_key", next);
    }

    /// Commit: the write generation becomes the read generation.
    pub fn set_write_is_read(&mut self) -> CodecResult<()> {
        let keys = match &self.state {
            KeyState::Rekeying { write, .. } => Arc::clone(write),
            KeyState::Stable { .. } => return Ok(()),
            KeyState::Initial | KeyState::ReadOnly { .. } => {
                return Err(self.reject("set_write_is_read"))
            }
        };
        self.transition("set_write_is_read", KeyState::Stable { keys });
        Ok(())
    }

    /// The read generation becomes the write generation as well.
    ///
    /// Used before the first write after open. In `Rekeying` this discards
    /// the pending write generation.
    pub fn set_read_is_write(&mut self) -> CodecResult<()> {
        let keys = match &self.state {
            KeyState::ReadOnly { read } | KeyState::Rekeying { read, .. } => Arc::clone(read),
            KeyState::Stable { .. } => return Ok(()),
            KeyState::Initial => return Err(self.reject("set_read_is_write")),
        };
        self.transition("set_read_is_write", KeyState::Stable { keys });
        Ok(())
    }

    /// Key generation used for decryption.
    pub fn read_keys(&self) -> CodecResult<&KeyMaterial> {
        match &self.state {
            KeyState::ReadOnly { read } | KeyState::Rekeying { read, .. } => Ok(read),
            KeyState::Stable { keys } => Ok(keys),
            KeyState::Initial => Err(CodecError::KeyRejected("no read key is set".into())),
        }
    }

    /// Key generation used for encryption when the host asks for the write key.
    pub fn write_keys(&self) -> CodecResult<&KeyMaterial> {
        match &self.state {
            KeyState::Rekeying { write, .. } => Ok(write),
            KeyState::Stable { keys } => Ok(keys),
            KeyState::Initial | KeyState::ReadOnly { .. } => {
                Err(CodecError::KeyRejected("no write key is set".into()))
            }
        }
    }

    pub fn keys(&self, use_write_key: bool) -> CodecResult<&KeyMaterial> {
        if use_write_key {
            self.write_keys()
        } else {
            self.read_keys()
        }
    }

    /// Key state for a cloned connection: committed keys only.
    ///
    /// A clone taken mid-rekey sees the old read generation and no write key.
    pub fn snapshot(&self) -> Self {
        let state = match &self.state {
            KeyState::Rekeying { read, .. } => KeyState::ReadOnly {
                read: Arc::clone(read),
            },
            other => other.clone(),
        };
        Self {
            profile: Arc::clone(&self.profile),
            state,
        }
    }

    fn transition(&mut self, op: &'static str, next: KeyState) {
        let from = self.phase();
        self.state = next;
        tracing::debug!(op, from = %from, to = %self.phase(), "key state transition");
    }

    fn reject(&self, op: &'static str) -> CodecError {
        CodecError::InvalidState {
            op,
            state: self.phase().as_str(),
        }
    }
}

impl std::fmt::Debug for KeyHierarchy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyHierarchy")
            .field("profile_version", &self.profile.version)
            .field("phase", &self.phase())
            .finish()
    }
}
