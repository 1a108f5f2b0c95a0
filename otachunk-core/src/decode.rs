use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::digest::Digest;
use crate::digest_list;
use crate::error::{OtaError, Result, Step, StepContext};
use crate::naming::{parse_chunk_name, validate_base_name, ChunkName};
use crate::progress::Progress;
use crate::verify::{ChainVerifier, VerifyOptions};

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ChunkEntry {
    pub index: u32,
    pub filename_digest: Digest,
    pub path: PathBuf,
}

/// Chunk files of one base name, ordered by numeric index.
#[derive(Serialize, Clone, Debug)]
pub struct ChunkSet {
    pub dir: PathBuf,
    pub base_name: String,
    pub entries: Vec<ChunkEntry>,
}

impl ChunkSet {
    pub fn scan(dir: &Path, base_name: &str) -> Result<ChunkSet> {
        validate_base_name(base_name)?;
        let mut entries = Vec::new();
        let mut provisional = 0usize;
        for name in list_chunk_names(dir, base_name)? {
            match name {
                (ChunkName::Final { index, digest }, path) => {
                    entries.push(ChunkEntry { index, filename_digest: digest, path })
                }
                (ChunkName::Provisional { .. }, _) => provisional += 1,
            }
        }
        if provisional > 0 {
            return Err(OtaError::PartialChunkSet { dir: dir.to_path_buf(), provisional });
        }
        if entries.is_empty() {
            return Err(OtaError::NoChunksFound { dir: dir.to_path_buf(), base_name: base_name.to_string() });
        }
        // Numeric order; do not rely on directory listing order.
        entries.sort_by_key(|e| e.index);
        if let Some(pair) = entries.windows(2).find(|p| p[0].index == p[1].index) {
            return Err(OtaError::DuplicateChunkIndex { index: pair[0].index });
        }
        for (expected, e) in entries.iter().enumerate() {
            if e.index != expected as u32 {
                return Err(OtaError::MissingChunk { index: expected as u32 });
            }
        }
        Ok(ChunkSet { dir: dir.to_path_buf(), base_name: base_name.to_string(), entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Filename digest of chunk 0.
    pub fn anchor(&self) -> Digest {
        self.entries[0].filename_digest
    }
}

fn list_chunk_names(dir: &Path, base_name: &str) -> Result<Vec<(ChunkName, PathBuf)>> {
    if !dir.is_dir() {
        return Err(OtaError::NoChunksFound { dir: dir.to_path_buf(), base_name: base_name.to_string() });
    }
    let mut out = Vec::new();
    for ent in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let ent = ent.map_err(|e| OtaError::io(dir, e.into()))?;
        if !ent.file_type().is_file() {
            continue;
        }
        let file_name = ent.file_name().to_string_lossy();
        if let Some(name) = parse_chunk_name(base_name, &file_name) {
            out.push((name, ent.path().to_path_buf()));
        }
    }
    Ok(out)
}

/// Delete every chunk, provisional chunk and digest list of `base_name` in `dir`.
pub fn remove_chunk_set(dir: &Path, base_name: &str) -> Result<usize> {
    validate_base_name(base_name)?;
    if !dir.is_dir() {
        return Ok(0);
    }
    let mut doomed: Vec<PathBuf> = list_chunk_names(dir, base_name)?.into_iter().map(|(_, p)| p).collect();
    doomed.extend(digest_list::find(dir, base_name)?.into_iter().map(|(p, _)| p));
    for p in &doomed {
        fs::remove_file(p).map_err(|e| OtaError::io(p, e))?;
        debug!(path = %p.display(), "removed");
    }
    Ok(doomed.len())
}

#[derive(Debug, Clone, Default)]
pub struct DecodeOptions {
    /// Check the chain, anchor and digest list while reconstructing.
    pub verify: Option<VerifyOptions>,
    pub progress: bool,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct DecodeReport {
    pub chunk_count: u32,
    pub total_size: u64,
    pub anchor_digest: Digest,
    pub verified: bool,
    pub digest_list_checked: bool,
    /// Content of the final chunk was checked too.
    pub tail_verified: bool,
}

fn part_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    output.with_file_name(name)
}

pub struct Decoder;

impl Decoder {
    /// Stream the chunk set into `out` in index order.
    pub fn decode<W: Write>(
        dir: &Path,
        base_name: &str,
        out: &mut W,
        opts: &DecodeOptions,
    ) -> Result<DecodeReport> {
        let set = ChunkSet::scan(dir, base_name).at(Step::Scan)?;
        info!(dir = %dir.display(), base_name, chunks = set.len(), "decoding chunk set");

        let prog = Progress::new(opts.progress);
        prog.set_stage("Reconstructing");
        prog.set_chunks_total(set.len() as u64);
        prog.start();
        let result = Self::reconstruct(&set, out, opts, &prog).at(Step::Reconstruct);
        prog.stop();
        result
    }

    fn reconstruct<W: Write>(
        set: &ChunkSet,
        out: &mut W,
        opts: &DecodeOptions,
        prog: &Progress,
    ) -> Result<DecodeReport> {
        let mut verifier = opts.verify.map(|v| ChainVerifier::new(&set.entries, v));
        let mut total_size = 0u64;
        for e in &set.entries {
            let data = fs::read(&e.path).map_err(|err| OtaError::io(&e.path, err))?;
            if let Some(v) = verifier.as_mut() {
                v.feed(e.index, &data)?;
            }
            out.write_all(&data).map_err(|err| OtaError::io("<output>", err))?;
            total_size += data.len() as u64;
            prog.inc_chunk(data.len() as u64);
        }
        out.flush().map_err(|err| OtaError::io("<output>", err))?;
        let verified = verifier.is_some();
        let (digest_list_checked, tail_verified) = match verifier {
            Some(v) => {
                let c = v.finish(&set.dir, &set.base_name)?;
                (c.digest_list_checked, c.tail_verified)
            }
            None => (false, false),
        };
        Ok(DecodeReport {
            chunk_count: set.len() as u32,
            total_size,
            anchor_digest: set.anchor(),
            verified,
            digest_list_checked,
            tail_verified,
        })
    }

    /// Reconstruct into a new file at `output`.
    ///
    /// Bytes go to a sibling `.part` file that is renamed over `output` only
    /// once every check has passed; on failure it is removed and `output` is
    /// left as it was.
    pub fn decode_to_file(
        dir: &Path,
        base_name: &str,
        output: &Path,
        opts: &DecodeOptions,
    ) -> Result<DecodeReport> {
        let part = part_path(output);
        let result = Self::decode_into(dir, base_name, &part, opts)
            .and_then(|rep| fs::rename(&part, output).map(|_| rep).map_err(|e| OtaError::io(output, e)));
        if result.is_err() && part.exists() {
            if let Err(e) = fs::remove_file(&part) {
                warn!(path = %part.display(), error = %e, "could not remove partial output");
            }
        }
        result
    }

    fn decode_into(dir: &Path, base_name: &str, part: &Path, opts: &DecodeOptions) -> Result<DecodeReport> {
        let f = File::create(part).map_err(|e| OtaError::io(part, e))?;
        let mut w = BufWriter::new(f);
        Self::decode(dir, base_name, &mut w, opts)
    }

    pub fn decode_to_vec(dir: &Path, base_name: &str, opts: &DecodeOptions) -> Result<(Vec<u8>, DecodeReport)> {
        let mut buf = Vec::new();
        let report = Self::decode(dir, base_name, &mut buf, opts)?;
        Ok((buf, report))
    }
}
