//! Sidecar `ota_md5_<base>.<H>` listing chunk digests, one per line.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::digest::Digest;
use crate::error::{OtaError, Result};
use crate::naming::{digest_list_name, parse_digest_list_name};

/// Which digests the sidecar lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestListPolicy {
    /// N lines: line `i` is the content digest of chunk `i`.
    #[default]
    AllChunks,
    /// N-1 lines, one per chained chunk `i >= 1`: its filename digest, which
    /// is the content digest of chunk `i - 1`. The anchor is not repeated.
    SkipAnchor,
}

impl FromStr for DigestListPolicy {
    type Err = OtaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(DigestListPolicy::AllChunks),
            "skip-anchor" => Ok(DigestListPolicy::SkipAnchor),
            other => Err(OtaError::InvalidConfig(format!(
                "digest list policy {:?}: expected all or skip-anchor",
                other
            ))),
        }
    }
}

impl fmt::Display for DigestListPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestListPolicy::AllChunks => f.write_str("all"),
            DigestListPolicy::SkipAnchor => f.write_str("skip-anchor"),
        }
    }
}

/// Entries the sidecar must hold for a set with these content digests.
pub fn expected_entries(content: &[Digest], policy: DigestListPolicy) -> &[Digest] {
    match policy {
        DigestListPolicy::AllChunks => content,
        DigestListPolicy::SkipAnchor => &content[..content.len().saturating_sub(1)],
    }
}

pub fn render(entries: &[Digest]) -> String {
    let mut out = String::with_capacity(entries.len() * 33);
    for d in entries {
        out.push_str(&d.to_hex());
        out.push('\n');
    }
    out
}

pub fn write(
    dir: &Path,
    base_name: &str,
    anchor: &Digest,
    content: &[Digest],
    policy: DigestListPolicy,
) -> Result<PathBuf> {
    let path = dir.join(digest_list_name(base_name, anchor));
    fs::write(&path, render(expected_entries(content, policy))).map_err(|e| OtaError::io(&path, e))?;
    Ok(path)
}

pub fn read(path: &Path) -> Result<Vec<Digest>> {
    let text = fs::read_to_string(path).map_err(|e| OtaError::io(path, e))?;
    text.lines().map(|l| l.trim_end_matches('\r').parse()).collect()
}

/// Check a sidecar file against the content digests of its chunk set.
pub fn check(path: &Path, content: &[Digest], policy: DigestListPolicy) -> Result<()> {
    let got = read(path)?;
    let want = expected_entries(content, policy);
    if got.len() != want.len() {
        return Err(OtaError::DigestListMismatch {
            path: path.to_path_buf(),
            reason: format!("{} entries, expected {} ({} policy)", got.len(), want.len(), policy),
        });
    }
    if let Some(line) = got.iter().zip(want).position(|(g, w)| g != w) {
        return Err(OtaError::DigestListMismatch {
            path: path.to_path_buf(),
            reason: format!("line {}: {} != {}", line + 1, got[line], want[line]),
        });
    }
    Ok(())
}

/// Every sidecar for `base_name` in `dir` with its anchor, sorted by path.
pub fn find(dir: &Path, base_name: &str) -> Result<Vec<(PathBuf, Digest)>> {
    let mut found = Vec::new();
    for ent in walkdir::WalkDir::new(dir).min_depth(1).max_depth(1) {
        let ent = ent.map_err(|e| OtaError::io(dir, e.into()))?;
        if !ent.file_type().is_file() {
            continue;
        }
        let name = ent.file_name().to_string_lossy();
        if let Some(anchor) = parse_digest_list_name(base_name, &name) {
            found.push((ent.path().to_path_buf(), anchor));
        }
    }
    found.sort();
    Ok(found)
}
