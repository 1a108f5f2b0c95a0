use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::chain::{self, AnchorPolicy};
use crate::decode::remove_chunk_set;
use crate::digest::Digest;
use crate::digest_list::{self, DigestListPolicy};
use crate::error::{OtaError, Result, Step, StepContext};
use crate::manifest::{self, ImageBlock, Manifest, UpdateOutcome};
use crate::naming::{provisional_name, validate_base_name, MAX_CHUNKS};
use crate::progress::Progress;
use crate::split::{chunk_count, Splitter, DEFAULT_CHUNK_SIZE};

/// Manifest to update (when the file exists) or create (when it does not).
#[derive(Clone, Debug)]
pub struct ManifestTarget {
    pub path: PathBuf,
    /// `ota_version` of a freshly created manifest.
    pub ota_version: u32,
    /// Blocks placed before the encoded image's block in a fresh manifest (e.g. kernel).
    pub extra_blocks: Vec<ImageBlock>,
}

impl ManifestTarget {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), ota_version: 0, extra_blocks: Vec::new() }
    }
}

#[derive(Clone, Debug)]
pub struct EncoderConfig {
    pub chunk_size: usize,
    /// Chunk file prefix; defaults to the image's file name.
    pub base_name: Option<String>,
    pub anchor: AnchorPolicy,
    pub digest_list: DigestListPolicy,
    /// `img_type` of the manifest block describing this image.
    pub img_type: String,
    pub manifest: Option<ManifestTarget>,
    /// Empty marker file written last, e.g. `ota_v0.ok`.
    pub ok_marker: Option<String>,
    pub progress: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            base_name: None,
            anchor: AnchorPolicy::SelfDigest,
            digest_list: DigestListPolicy::AllChunks,
            img_type: "rootfs".to_string(),
            manifest: None,
            ok_marker: None,
            progress: false,
        }
    }
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EncodeWarning {
    NoMatchingBlock { img_type: String, manifest: PathBuf },
}

#[derive(Serialize, Clone, Debug)]
pub struct EncodeResult {
    pub chunk_count: u32,
    pub anchor_digest: Digest,
    pub total_size: u64,
    pub base_name: String,
    pub content_digests: Vec<Digest>,
    pub chunk_paths: Vec<PathBuf>,
    pub digest_list_path: PathBuf,
    pub manifest_path: Option<PathBuf>,
    pub warnings: Vec<EncodeWarning>,
}

pub struct Encoder;

impl Encoder {
    pub fn encode(image: &Path, output: &Path, cfg: &EncoderConfig) -> Result<EncodeResult> {
        // 1) Validate everything that can be checked before touching the output dir
        let (base_name, image_len) = Self::open(image, cfg).at(Step::Open)?;
        let existing_manifest = match &cfg.manifest {
            Some(t) if t.path.exists() => Some(read_manifest(&t.path).at(Step::Manifest)?),
            _ => None,
        };
        info!(image = %image.display(), output = %output.display(), base_name, image_len, "encoding");

        let prog = Progress::new(cfg.progress);
        prog.set_chunks_total(chunk_count(image_len, cfg.chunk_size));
        prog.start();
        let result = Self::run(image, output, cfg, &base_name, existing_manifest, &prog);
        prog.stop();
        result
    }

    fn open(image: &Path, cfg: &EncoderConfig) -> Result<(String, u64)> {
        if cfg.chunk_size == 0 {
            return Err(OtaError::InvalidConfig("chunk size must be greater than zero".into()));
        }
        let meta = match fs::metadata(image) {
            Ok(m) if m.is_file() => m,
            _ => return Err(OtaError::SourceNotFound(image.to_path_buf())),
        };
        let base_name = match &cfg.base_name {
            Some(b) => b.clone(),
            None => image
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| OtaError::InvalidConfig(format!("cannot derive base name from {:?}", image)))?,
        };
        validate_base_name(&base_name)?;
        let len = meta.len();
        if len == 0 {
            return Err(OtaError::EmptyInput);
        }
        let chunks = chunk_count(len, cfg.chunk_size);
        if chunks > MAX_CHUNKS {
            return Err(OtaError::InvalidConfig(format!(
                "{} bytes at chunk size {} needs {} chunks, at most {} fit four-digit indices",
                len, cfg.chunk_size, chunks, MAX_CHUNKS
            )));
        }
        Ok((base_name, len))
    }

    fn run(
        image: &Path,
        output: &Path,
        cfg: &EncoderConfig,
        base_name: &str,
        existing_manifest: Option<Manifest>,
        prog: &Progress,
    ) -> Result<EncodeResult> {
        // 2) Split into provisional <base>.NNNN files
        prog.set_stage("Splitting");
        let (provisional, total_size, image_digest) =
            Self::split(image, output, cfg, base_name, prog).at(Step::Split)?;

        // 3) Content digests (parallel), then the chain, then renames
        prog.set_stage("Hashing");
        let content = chain::file_digests_counted(&provisional, prog).at(Step::Chain)?;
        let anchor = content
            .first()
            .ok_or(OtaError::EmptyInput)
            .and_then(|first| cfg.anchor.resolve(first, image_digest.as_ref()))
            .at(Step::Chain)?;
        let tagged = chain::chain(&content, anchor);
        let chunk_paths = chain::rename_chunks(output, base_name, &tagged).at(Step::Chain)?;
        info!(chunks = tagged.len(), %anchor, policy = %cfg.anchor, "chunks tagged");

        // 4) Sidecar digest list, read back before reporting success
        let digest_list_path = digest_list::write(output, base_name, &anchor, &content, cfg.digest_list)
            .and_then(|p| digest_list::check(&p, &content, cfg.digest_list).map(|_| p))
            .at(Step::DigestList)?;

        // 5) Manifest
        let mut warnings = Vec::new();
        let manifest_path = match &cfg.manifest {
            Some(target) => {
                Self::write_manifest(target, existing_manifest, cfg, base_name, total_size, &anchor, &mut warnings)
                    .at(Step::Manifest)?;
                Some(target.path.clone())
            }
            None => None,
        };

        // 6) Ok marker
        if let Some(marker) = &cfg.ok_marker {
            let p = output.join(marker);
            fs::write(&p, b"").map_err(|e| OtaError::io(&p, e)).at(Step::Marker)?;
        }

        Ok(EncodeResult {
            chunk_count: tagged.len() as u32,
            anchor_digest: anchor,
            total_size,
            base_name: base_name.to_string(),
            content_digests: content,
            chunk_paths,
            digest_list_path,
            manifest_path,
            warnings,
        })
    }

    fn split(
        image: &Path,
        output: &Path,
        cfg: &EncoderConfig,
        base_name: &str,
        prog: &Progress,
    ) -> Result<(Vec<PathBuf>, u64, Option<Digest>)> {
        fs::create_dir_all(output).map_err(|e| OtaError::io(output, e))?;
        let stale = remove_chunk_set(output, base_name)?;
        if stale > 0 {
            warn!(stale, dir = %output.display(), "removed files of a previous chunk set");
        }

        let f = File::open(image).map_err(|e| OtaError::io(image, e))?;
        let mut splitter = Splitter::new(BufReader::new(f), cfg.chunk_size)?;
        if cfg.anchor.needs_image_digest() {
            splitter = splitter.with_image_digest();
        }
        let mut paths = Vec::new();
        for chunk in splitter.by_ref() {
            let chunk = chunk?;
            let p = output.join(provisional_name(base_name, chunk.index));
            fs::write(&p, &chunk.data)
                .map_err(|source| OtaError::ChunkWrite { index: chunk.index, path: p.clone(), source })?;
            prog.inc_chunk(chunk.len() as u64);
            paths.push(p);
        }
        Ok((paths, splitter.bytes_read(), splitter.image_digest()))
    }

    fn write_manifest(
        target: &ManifestTarget,
        existing: Option<Manifest>,
        cfg: &EncoderConfig,
        base_name: &str,
        total_size: u64,
        anchor: &Digest,
        warnings: &mut Vec<EncodeWarning>,
    ) -> Result<()> {
        let path = &target.path;
        let mut m = match existing {
            Some(m) => m,
            None => {
                let mut blocks = target.extra_blocks.clone();
                blocks.push(ImageBlock {
                    img_type: cfg.img_type.clone(),
                    img_name: base_name.to_string(),
                    img_size: total_size,
                    img_md5: *anchor,
                });
                let m = Manifest::for_ota(target.ota_version, &blocks);
                fs::write(path, manifest::render(&m)).map_err(|e| OtaError::io(path, e))?;
                info!(manifest = %path.display(), "manifest created");
                return Ok(());
            }
        };
        match manifest::update_image_block(&mut m, &cfg.img_type, total_size, anchor) {
            UpdateOutcome::Updated { block } => {
                fs::write(path, manifest::render(&m)).map_err(|e| OtaError::io(path, e))?;
                info!(manifest = %path.display(), block, "manifest updated");
            }
            UpdateOutcome::NoMatchingBlock { img_type } => {
                // Left byte-identical.
                warnings.push(EncodeWarning::NoMatchingBlock { img_type, manifest: path.clone() });
            }
        }
        Ok(())
    }
}

fn read_manifest(path: &Path) -> Result<Manifest> {
    let text = fs::read_to_string(path).map_err(|e| OtaError::io(path, e))?;
    manifest::parse(&text)
}
