pub mod config;
pub mod error;

pub use config::{CodecFormatProfile, IvMac, KdfMac, PageCipher, PagecryptConfig};
pub use error::{CodecError, CodecResult, PagecryptError, PagecryptResult};
