//! Content digests and the backward digest chain embedded in chunk file names.
//!
//! Chunk 0 carries the anchor digest `H`; every chunk `i >= 1` carries the
//! content digest of chunk `i - 1`, so a verifier walking forward checks each
//! chunk against the digest its successor's name records.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::digest::{digest_file, Digest};
use crate::error::{OtaError, Result};
use crate::naming::{chunk_file_name, provisional_name};
use crate::progress::Progress;
use crate::split::Chunk;

/// How the filename digest of chunk 0 is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnchorPolicy {
    /// `H` = digest of chunk 0's own bytes.
    #[default]
    SelfDigest,
    /// `H` = digest of the whole, unsplit image.
    WholeImage,
    /// `H` supplied by the caller, used verbatim.
    External(Digest),
}

impl AnchorPolicy {
    pub fn resolve(&self, first_content: &Digest, whole_image: Option<&Digest>) -> Result<Digest> {
        match self {
            AnchorPolicy::SelfDigest => Ok(*first_content),
            AnchorPolicy::External(h) => Ok(*h),
            AnchorPolicy::WholeImage => whole_image.copied().ok_or_else(|| {
                OtaError::InvalidConfig("whole-image anchor requires the image digest".into())
            }),
        }
    }

    pub fn needs_image_digest(&self) -> bool {
        matches!(self, AnchorPolicy::WholeImage)
    }
}

/// Accepts `self`, `whole-image`, or a 32 hex digit external anchor.
impl FromStr for AnchorPolicy {
    type Err = OtaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "self" => Ok(AnchorPolicy::SelfDigest),
            "whole-image" => Ok(AnchorPolicy::WholeImage),
            other if Digest::looks_like(other) => Ok(AnchorPolicy::External(other.parse()?)),
            other => Err(OtaError::InvalidConfig(format!(
                "anchor policy {:?}: expected self, whole-image or a 32 hex digit digest",
                other
            ))),
        }
    }
}

impl fmt::Display for AnchorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnchorPolicy::SelfDigest => f.write_str("self"),
            AnchorPolicy::WholeImage => f.write_str("whole-image"),
            AnchorPolicy::External(h) => write!(f, "{}", h),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaggedChunk {
    pub index: u32,
    pub content_digest: Digest,
    pub filename_digest: Digest,
}

/// Content digests of in-memory chunks, in index order.
pub fn content_digests(chunks: &[Chunk]) -> Vec<Digest> {
    chunks.par_iter().map(|c| Digest::of(&c.data)).collect()
}

/// Content digests of chunk files, in the order given.
pub fn file_digests(paths: &[PathBuf]) -> Result<Vec<Digest>> {
    file_digests_counted(paths, &Progress::disabled())
}

/// [`file_digests`], ticking `prog` once per hashed file.
pub(crate) fn file_digests_counted(paths: &[PathBuf], prog: &Progress) -> Result<Vec<Digest>> {
    paths
        .par_iter()
        .map(|p| {
            let d = digest_file(p)?;
            let len = fs::metadata(p).map(|m| m.len()).map_err(|e| OtaError::io(p, e))?;
            prog.inc_chunk(len);
            Ok(d)
        })
        .collect()
}

/// Build the chain from already computed content digests.
pub fn chain(content: &[Digest], anchor: Digest) -> Vec<TaggedChunk> {
    let mut out = Vec::with_capacity(content.len());
    let mut prev = anchor;
    for (i, d) in content.iter().enumerate() {
        out.push(TaggedChunk { index: i as u32, content_digest: *d, filename_digest: prev });
        prev = *d;
    }
    out
}

/// Tag in-memory chunks. `WholeImage` needs [`tag_with_image`].
pub fn tag(chunks: &[Chunk], policy: &AnchorPolicy) -> Result<Vec<TaggedChunk>> {
    tag_with_image(chunks, policy, None)
}

pub fn tag_with_image(
    chunks: &[Chunk],
    policy: &AnchorPolicy,
    whole_image: Option<&Digest>,
) -> Result<Vec<TaggedChunk>> {
    let content = content_digests(chunks);
    let first = content.first().ok_or(OtaError::EmptyInput)?;
    let anchor = policy.resolve(first, whole_image)?;
    Ok(chain(&content, anchor))
}

/// Rename provisional files in `dir` to their chained names, in index order.
///
/// Stops at the first failure. Files already renamed stay renamed and the
/// rest stay provisional; the scan in `decode` reports such a set as partial.
pub fn rename_chunks(dir: &Path, base_name: &str, tagged: &[TaggedChunk]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::with_capacity(tagged.len());
    for t in tagged {
        let from = dir.join(provisional_name(base_name, t.index));
        let to = dir.join(chunk_file_name(base_name, t.index, &t.filename_digest));
        if to.exists() {
            return Err(OtaError::ChunkWrite {
                index: t.index,
                path: to,
                source: std::io::Error::new(std::io::ErrorKind::AlreadyExists, "target name already exists"),
            });
        }
        fs::rename(&from, &to).map_err(|source| OtaError::ChunkWrite { index: t.index, path: from.clone(), source })?;
        debug!(index = t.index, name = %to.display(), "renamed chunk");
        out.push(to);
    }
    Ok(out)
}
