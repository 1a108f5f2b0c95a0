//! On-disk names of a chunk set.
//!
//! - provisional chunk: `<base>.<NNNN>`
//! - chunk: `<base>.<NNNN>.<md5>`
//! - digest list: `ota_md5_<base>.<anchor md5>`

use std::path::{Component, Path};

use crate::digest::Digest;
use crate::error::{OtaError, Result};

/// Indices are always four zero-padded digits.
pub const INDEX_WIDTH: usize = 4;
pub const MAX_CHUNKS: u64 = 10_000;
pub const DIGEST_LIST_PREFIX: &str = "ota_md5_";

/// Name of a file that may belong to a chunk set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkName {
    Provisional { index: u32 },
    Final { index: u32, digest: Digest },
}

impl ChunkName {
    pub fn index(&self) -> u32 {
        match *self {
            ChunkName::Provisional { index } | ChunkName::Final { index, .. } => index,
        }
    }
}

/// Reject base names that would not stay a single file name inside the output dir.
pub fn validate_base_name(base_name: &str) -> Result<()> {
    if base_name.is_empty() {
        return Err(OtaError::InvalidConfig("base name is empty".into()));
    }
    if base_name.contains(['/', '\\', '\0']) {
        return Err(OtaError::InvalidConfig(format!(
            "base name {:?} must not contain path separators",
            base_name
        )));
    }
    let mut comps = Path::new(base_name).components();
    match (comps.next(), comps.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(OtaError::InvalidConfig(format!("base name {:?} is not a plain file name", base_name))),
    }
}

pub fn provisional_name(base_name: &str, index: u32) -> String {
    format!("{}.{:04}", base_name, index)
}

pub fn chunk_file_name(base_name: &str, index: u32, filename_digest: &Digest) -> String {
    format!("{}.{:04}.{}", base_name, index, filename_digest)
}

pub fn digest_list_name(base_name: &str, anchor: &Digest) -> String {
    format!("{}{}.{}", DIGEST_LIST_PREFIX, base_name, anchor)
}

fn parse_index(s: &str) -> Option<u32> {
    if s.len() != INDEX_WIDTH || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Parse `file_name` as a chunk of `base_name`. Anything else yields `None`.
pub fn parse_chunk_name(base_name: &str, file_name: &str) -> Option<ChunkName> {
    let rest = file_name.strip_prefix(base_name)?.strip_prefix('.')?;
    match rest.split_once('.') {
        None => parse_index(rest).map(|index| ChunkName::Provisional { index }),
        Some((idx, digest)) => {
            let index = parse_index(idx)?;
            if !Digest::looks_like(digest) {
                return None;
            }
            let digest = digest.parse().ok()?;
            Some(ChunkName::Final { index, digest })
        }
    }
}

/// Parse `file_name` as the digest list of `base_name`, returning its anchor.
pub fn parse_digest_list_name(base_name: &str, file_name: &str) -> Option<Digest> {
    let rest = file_name.strip_prefix(DIGEST_LIST_PREFIX)?.strip_prefix(base_name)?.strip_prefix('.')?;
    if !Digest::looks_like(rest) {
        return None;
    }
    rest.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const D: &str = "900150983cd24fb0d6963f7d28e17f72";

    #[test]
    fn formats_zero_padded_names() {
        let d: Digest = D.parse().unwrap();
        assert_eq!(provisional_name("rootfs.squashfs", 7), "rootfs.squashfs.0007");
        assert_eq!(chunk_file_name("rootfs.squashfs", 12, &d), format!("rootfs.squashfs.0012.{D}"));
        assert_eq!(digest_list_name("rootfs.squashfs", &d), format!("ota_md5_rootfs.squashfs.{D}"));
    }

    #[test]
    fn parses_only_matching_names() {
        let base = "rootfs.squashfs";
        assert_eq!(
            parse_chunk_name(base, &format!("{base}.0003.{D}")),
            Some(ChunkName::Final { index: 3, digest: D.parse().unwrap() })
        );
        assert_eq!(parse_chunk_name(base, "rootfs.squashfs.0003"), Some(ChunkName::Provisional { index: 3 }));
        assert_eq!(parse_chunk_name(base, "rootfs.squashfs.003"), None);
        assert_eq!(parse_chunk_name(base, "rootfs.squashfs.00003"), None);
        assert_eq!(parse_chunk_name(base, &format!("rootfs.squashfs.0003.{D}.bak")), None);
        assert_eq!(parse_chunk_name(base, &format!("xImage.0003.{D}")), None);
        assert_eq!(parse_chunk_name(base, &format!("ota_md5_{base}.{D}")), None);
        assert_eq!(parse_digest_list_name(base, &format!("ota_md5_{base}.{D}")), Some(D.parse().unwrap()));
    }

    #[test]
    fn base_name_must_be_plain() {
        assert!(validate_base_name("rootfs.squashfs").is_ok());
        assert!(validate_base_name("").is_err());
        assert!(validate_base_name("..").is_err());
        assert!(validate_base_name(".").is_err());
        assert!(validate_base_name("a/b").is_err());
        assert!(validate_base_name("a\\b").is_err());
    }
}
