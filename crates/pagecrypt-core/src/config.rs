use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CodecError, CodecResult, PagecryptError, PagecryptResult};

/// Block size of every supported page cipher (Twofish and AES are 128-bit).
pub const CIPHER_BLOCK_SIZE: usize = 16;

/// Largest page the historical host page store can produce.
pub const DEFAULT_MAX_PAGE_SIZE: usize = 65536;

/// Page size used by the CLI when the config does not say otherwise.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Upper bound on a profile's XTS key: two 64-byte halves.
pub const MAX_KEY_SIZE: usize = 128;

/// Upper bound on a profile's IV-derivation key.
pub const MAX_IV_KEY_SIZE: usize = 64;

/// Keyed PRF used by the passphrase key-derivation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KdfMac {
    HmacSha1,
    HmacSha256,
}

/// Keyed MAC used to turn a page number into an XTS tweak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IvMac {
    CmacTwofish,
    CmacAes256,
}

/// Tweakable cipher applied to page bodies. XTS splits its key between a
/// data cipher and a tweak cipher, so the profile key size is twice the
/// per-cipher key size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PageCipher {
    TwofishXts,
    Aes256Xts,
}

/// Every constant that must match bit-exactly between the writer and the
/// reader of an encrypted database.
///
/// Changing any field of a profile after a database has been encrypted with
/// it makes that database unreadable, even with the right passphrase. New
/// formats get a new `version`; existing ones are never edited.
///
/// The historical profile uses one fixed salt for every database. That weakens
/// the derivation against precomputation across databases, but it is part of
/// the on-disk contract and is kept as is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecFormatProfile {
    /// Format version tag (1 = historical profile)
    pub version: u32,
    /// PRF for passphrase stretching
    pub kdf_mac: KdfMac,
    /// MAC for page tweak derivation
    pub iv_mac: IvMac,
    /// Page cipher and mode
    pub cipher: PageCipher,
    /// Salt mixed into every key derivation
    pub salt: Vec<u8>,
    /// PBKDF2 iteration count
    pub iterations: u32,
    /// Encryption key size in bytes (both XTS halves)
    pub key_size: usize,
    /// IV-derivation key size in bytes
    pub iv_key_size: usize,
    /// Size of the codec's staging buffer; larger pages are rejected
    pub max_page_size: usize,
}

impl CodecFormatProfile {
    /// The profile every pre-existing database was written with.
    pub fn legacy_v1() -> Self {
        Self {
            version: 1,
            kdf_mac: KdfMac::HmacSha1,
            iv_mac: IvMac::CmacTwofish,
            cipher: PageCipher::TwofishXts,
            salt: b"&g#nB'9]".to_vec(),
            iterations: 10_000,
            key_size: 64,
            iv_key_size: 32,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }

    /// Look up a built-in profile by version tag.
    pub fn builtin(version: u32) -> Option<Self> {
        match version {
            1 => Some(Self::legacy_v1()),
            _ => None,
        }
    }

    /// Length of one key generation: encryption key followed by IV key.
    pub fn derived_len(&self) -> usize {
        self.key_size + self.iv_key_size
    }

    pub fn validate(&self) -> CodecResult<()> {
        if self.version == 0 {
            return Err(CodecError::InvalidParameter(
                "profile version must be at least 1".into(),
            ));
        }
        if self.iterations == 0 {
            return Err(CodecError::InvalidParameter(
                "iteration count must be non-zero".into(),
            ));
        }
        if self.salt.is_empty() {
            return Err(CodecError::InvalidParameter("salt must not be empty".into()));
        }
        if self.key_size == 0 || self.key_size % 2 != 0 || self.key_size > MAX_KEY_SIZE {
            return Err(CodecError::InvalidParameter(format!(
                "XTS key size must be a non-zero even number of bytes up to {MAX_KEY_SIZE}, got {}",
                self.key_size
            )));
        }
        if self.iv_key_size == 0 || self.iv_key_size > MAX_IV_KEY_SIZE {
            return Err(CodecError::InvalidParameter(format!(
                "IV-derivation key size must be 1..={MAX_IV_KEY_SIZE} bytes, got {}",
                self.iv_key_size
            )));
        }
        if self.max_page_size < CIPHER_BLOCK_SIZE || self.max_page_size > DEFAULT_MAX_PAGE_SIZE {
            return Err(CodecError::InvalidParameter(format!(
                "max page size must be {CIPHER_BLOCK_SIZE}..={DEFAULT_MAX_PAGE_SIZE} bytes, got {}",
                self.max_page_size
            )));
        }
        Ok(())
    }
}

impl Default for CodecFormatProfile {
    fn default() -> Self {
        Self::legacy_v1()
    }
}

/// Top-level configuration (loaded from pagecrypt.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PagecryptConfig {
    pub log: LogConfig,
    pub codec: CodecConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Page size of files handled by the CLI (default: 4096)
    pub page_size: usize,
    /// Format profile; defaults to the historical profile
    pub profile: CodecFormatProfile,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            profile: CodecFormatProfile::default(),
        }
    }
}

impl PagecryptConfig {
    /// Load a config file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> PagecryptResult<Self> {
        if !path.exists() {
            tracing::debug!("config file not found: {} (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| PagecryptError::Config(format!("parsing {}: {e}", path.display())))?;
        config.codec.profile.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_profile_constants() {
        let profile = CodecFormatProfile::default();

        assert_eq!(profile.version, 1);
        assert_eq!(profile.salt, b"&g#nB'9]");
        assert_eq!(profile.salt.len(), 8);
        assert_eq!(profile.iterations, 10_000);
        assert_eq!(profile.key_size, 64);
        assert_eq!(profile.iv_key_size, 32);
        assert_eq!(profile.derived_len(), 96);
        assert_eq!(profile.kdf_mac, KdfMac::HmacSha1);
        assert_eq!(profile.iv_mac, IvMac::CmacTwofish);
        assert_eq!(profile.cipher, PageCipher::TwofishXts);
        assert!(profile.validate().is_ok());
    }

    #[test]
    fn test_builtin_lookup() {
        assert_eq!(
            CodecFormatProfile::builtin(1),
            Some(CodecFormatProfile::legacy_v1())
        );
        assert!(CodecFormatProfile::builtin(2).is_none());
    }

    #[test]
    fn test_validate_rejects_bad_profiles() {
        let cases: [fn(&mut CodecFormatProfile); 10] = [
            |p: &mut CodecFormatProfile| p.iterations = 0,
            |p: &mut CodecFormatProfile| p.salt.clear(),
            |p: &mut CodecFormatProfile| p.key_size = 0,
            |p: &mut CodecFormatProfile| p.key_size = 63,
            |p: &mut CodecFormatProfile| p.iv_key_size = 0,
            |p: &mut CodecFormatProfile| p.version = 0,
            |p: &mut CodecFormatProfile| p.max_page_size = 8,
            |p: &mut CodecFormatProfile| p.max_page_size = usize::MAX,
            |p: &mut CodecFormatProfile| p.key_size = MAX_KEY_SIZE + 2,
            |p: &mut CodecFormatProfile| p.iv_key_size = MAX_IV_KEY_SIZE + 1,
        ];
        for mutate in cases {
            let mut profile = CodecFormatProfile::default();
            mutate(&mut profile);
            assert!(matches!(
                profile.validate(),
                Err(CodecError::InvalidParameter(_))
            ));
        }
    }

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[log]
level = "debug"
format = "json"

[codec]
page_size = 8192

[codec.profile]
version = 2
kdf_mac = "hmac-sha256"
iv_mac = "cmac-aes256"
cipher = "aes256-xts"
salt = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]
iterations = 200000
key_size = 64
iv_key_size = 32
max_page_size = 32768
"#;
        let config: PagecryptConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, "json");
        assert_eq!(config.codec.page_size, 8192);
        assert_eq!(config.codec.profile.version, 2);
        assert_eq!(config.codec.profile.kdf_mac, KdfMac::HmacSha256);
        assert_eq!(config.codec.profile.iv_mac, IvMac::CmacAes256);
        assert_eq!(config.codec.profile.cipher, PageCipher::Aes256Xts);
        assert_eq!(config.codec.profile.salt.len(), 16);
        assert_eq!(config.codec.profile.iterations, 200_000);
        assert_eq!(config.codec.profile.max_page_size, 32768);
    }

    #[test]
    fn test_parse_defaults() {
        let config: PagecryptConfig = toml::from_str("").unwrap();

        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, "text");
        assert_eq!(config.codec.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.codec.profile, CodecFormatProfile::legacy_v1());
    }

    #[test]
    fn test_parse_partial_profile() {
        let toml_str = r#"
[codec.profile]
iterations = 1
"#;
        let config: PagecryptConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.codec.profile.iterations, 1);
        // Defaults
        assert_eq!(config.codec.profile.salt, b"&g#nB'9]");
        assert_eq!(config.codec.profile.key_size, 64);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = PagecryptConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: PagecryptConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.codec.profile, parsed.codec.profile);
        assert_eq!(config.codec.page_size, parsed.codec.page_size);
        assert_eq!(config.log.level, parsed.log.level);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PagecryptConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.codec.profile, CodecFormatProfile::legacy_v1());
    }

    #[test]
    fn test_load_rejects_invalid_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pagecrypt.toml");
        std::fs::write(&path, "[codec.profile]\niterations = 0\n").unwrap();

        let err = PagecryptConfig::load(&path).unwrap_err();
        assert!(matches!(
            err,
            PagecryptError::Codec(CodecError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_load_rejects_oversized_page_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pagecrypt.toml");
        std::fs::write(&path, "[codec.profile]\nmax_page_size = 1099511627776\n").unwrap();

        let err = PagecryptConfig::load(&path).unwrap_err();
        assert!(matches!(
            err,
            PagecryptError::Codec(CodecError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pagecrypt.toml");
        std::fs::write(&path, "[codec]\npage_size = \"big\"\n").unwrap();

        let err = PagecryptConfig::load(&path).unwrap_err();
        assert!(matches!(err, PagecryptError::Config(_)));
    }
}
