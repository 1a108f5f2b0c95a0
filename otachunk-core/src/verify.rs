use std::io;
use std::path::Path;

use tracing::{debug, warn};

use crate::chain::AnchorPolicy;
use crate::decode::{ChunkEntry, DecodeOptions, DecodeReport, Decoder};
use crate::digest::{Digest, Hasher};
use crate::digest_list::{self, DigestListPolicy};
use crate::error::{OtaError, Result};
use crate::naming::digest_list_name;

/// The conventions a chunk set is expected to follow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyOptions {
    pub anchor: AnchorPolicy,
    pub digest_list: DigestListPolicy,
}

/// What [`ChainVerifier::finish`] could vouch for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Coverage {
    pub(crate) digest_list_checked: bool,
    /// The last chunk has no successor naming it; only the anchor or the digest list can cover it.
    pub(crate) tail_verified: bool,
}

/// Streaming chain check, fed one chunk at a time in index order.
pub(crate) struct ChainVerifier<'a> {
    entries: &'a [ChunkEntry],
    opts: VerifyOptions,
    content: Vec<Digest>,
    image: Option<Hasher>,
}

impl<'a> ChainVerifier<'a> {
    pub(crate) fn new(entries: &'a [ChunkEntry], opts: VerifyOptions) -> Self {
        let image = opts.anchor.needs_image_digest().then(Hasher::new);
        Self { entries, opts, content: Vec::with_capacity(entries.len()), image }
    }

    pub(crate) fn feed(&mut self, index: u32, data: &[u8]) -> Result<()> {
        let digest = Digest::of(data);
        if let Some(h) = self.image.as_mut() {
            h.update(data);
        }
        if index == 0 {
            let found = self.entries[0].filename_digest;
            let expected = match self.opts.anchor {
                AnchorPolicy::SelfDigest => Some(digest),
                AnchorPolicy::External(h) => Some(h),
                // Known only once the whole stream is read.
                AnchorPolicy::WholeImage => None,
            };
            if let Some(expected) = expected {
                if expected != found {
                    return Err(OtaError::ChainVerificationFailed { index: 0, expected, found });
                }
            }
        }
        if let Some(next) = self.entries.get(index as usize + 1) {
            if next.filename_digest != digest {
                return Err(OtaError::ChainVerificationFailed {
                    index,
                    expected: next.filename_digest,
                    found: digest,
                });
            }
        }
        debug!(index, %digest, "chunk verified");
        self.content.push(digest);
        Ok(())
    }

    /// Final anchor check and digest list comparison.
    pub(crate) fn finish(self, dir: &Path, base_name: &str) -> Result<Coverage> {
        let anchor = self.entries[0].filename_digest;
        let whole_image = self.image.is_some();
        if let Some(h) = self.image {
            let expected = h.finalize();
            if expected != anchor {
                return Err(OtaError::ChainVerificationFailed { index: 0, expected, found: anchor });
            }
        }
        let list = dir.join(digest_list_name(base_name, &anchor));
        let digest_list_checked = list.is_file();
        if digest_list_checked {
            digest_list::check(&list, &self.content, self.opts.digest_list)?;
        }
        let tail_verified = whole_image
            || (self.entries.len() == 1 && self.opts.anchor == AnchorPolicy::SelfDigest)
            || (digest_list_checked && self.opts.digest_list == DigestListPolicy::AllChunks);
        if !tail_verified {
            warn!(
                index = self.entries.len() - 1,
                anchor = %self.opts.anchor,
                digest_list = %self.opts.digest_list,
                "last chunk not covered by the anchor or a digest list"
            );
        }
        Ok(Coverage { digest_list_checked, tail_verified })
    }
}

/// Verify a chunk set without keeping the reconstructed bytes.
pub fn verify(dir: &Path, base_name: &str, opts: VerifyOptions) -> Result<DecodeReport> {
    let decode_opts = DecodeOptions { verify: Some(opts), ..DecodeOptions::default() };
    Decoder::decode(dir, base_name, &mut io::sink(), &decode_opts)
}
