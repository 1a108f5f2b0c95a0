pub mod chain;
pub mod decode;
pub mod digest;
pub mod digest_list;
pub mod encode;
pub mod error;
pub mod manifest;
pub mod naming;
pub mod progress;
pub mod split;
pub mod verify;

pub use chain::AnchorPolicy;
pub use decode::{ChunkSet, DecodeOptions, DecodeReport, Decoder};
pub use digest::Digest;
pub use digest_list::DigestListPolicy;
pub use encode::{EncodeResult, Encoder, EncoderConfig, ManifestTarget};
pub use error::{OtaError, Result, Step};
pub use verify::VerifyOptions;
