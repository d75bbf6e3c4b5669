use thiserror::Error;

pub type CodecResult<T> = Result<T, CodecError>;

pub type PagecryptResult<T> = Result<T, PagecryptError>;

/// Errors raised by the key-derivation engine, key hierarchy and page codec.
///
/// None of these are transient: every variant is a caller-fixable condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A primitive refused a key, or a key slot was empty. During decryption
    /// the host should read this as "wrong passphrase", not as corruption.
    #[error("key rejected: {0}")]
    KeyRejected(String),

    #[error("page too large: {len} bytes (maximum {max})")]
    PageTooLarge { len: usize, max: usize },

    #[error("{op} is not permitted in key state {state}")]
    InvalidState {
        op: &'static str,
        state: &'static str,
    },
}

/// Host-side errors: page stores, config loading, the CLI.
#[derive(Debug, Error)]
pub enum PagecryptError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("page store error: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_too_large_message() {
        let err = CodecError::PageTooLarge {
            len: 70000,
            max: 65536,
        };
        assert_eq!(
            err.to_string(),
            "page too large: 70000 bytes (maximum 65536)"
        );
    }

    #[test]
    fn test_codec_error_converts_to_host_error() {
        let err: PagecryptError = CodecError::KeyRejected("empty read slot".into()).into();
        assert!(matches!(
            err,
            PagecryptError::Codec(CodecError::KeyRejected(_))
        ));
        assert_eq!(err.to_string(), "key rejected: empty read slot");
    }
}
