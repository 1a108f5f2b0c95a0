use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use otachunk_core::decode::{ChunkSet, DecodeOptions, Decoder};
use otachunk_core::encode::{EncodeWarning, Encoder, EncoderConfig, ManifestTarget};
use otachunk_core::manifest::{self, ImageBlock, UpdateOutcome, MANIFEST_FILE_NAME};
use otachunk_core::split::DEFAULT_CHUNK_SIZE;
use otachunk_core::{verify, AnchorPolicy, Digest, DigestListPolicy, VerifyOptions};

mod config;
use config::CliConfig;

#[derive(Parser)]
#[command(name = "otachunk", version, about = "Split firmware images into OTA chunk sets and put them back together")]
struct Cli {
    /// TOML file with default settings
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Log filter when RUST_LOG is unset (e.g. info, debug)
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(clap::Args, Clone, Default)]
struct PolicyArgs {
    /// Chunk 0 anchor: self, whole-image, or a 32 hex digit digest
    #[arg(long)]
    anchor: Option<String>,
    /// Digest list convention: all or skip-anchor
    #[arg(long)]
    digest_list: Option<String>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Split an image into a chunk set and update the manifest
    Encode {
        image: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Chunk file prefix (defaults to the image file name)
        #[arg(long)]
        base_name: Option<String>,
        #[arg(long)]
        img_type: Option<String>,
        /// Manifest to update or create (defaults to <OUT>/ota_update.in)
        #[arg(long, conflicts_with = "no_manifest")]
        manifest: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        no_manifest: bool,
        /// ota_version of a newly created manifest and of the ok marker name
        #[arg(long)]
        ota_version: Option<u32>,
        #[arg(long, requires_all = ["kernel_size", "kernel_md5"])]
        kernel_name: Option<String>,
        #[arg(long, requires = "kernel_name")]
        kernel_size: Option<u64>,
        #[arg(long, requires = "kernel_name")]
        kernel_md5: Option<String>,
        /// Do not write the ota_v<N>.ok marker
        #[arg(long, default_value_t = false)]
        no_marker: bool,
        #[arg(long, default_value_t = false)]
        progress: bool,
        #[arg(long, default_value_t = false)]
        json: bool,
        #[command(flatten)]
        policy: PolicyArgs,
    },
    /// Reassemble a chunk set into one image
    Decode {
        dir: PathBuf,
        #[arg(long)]
        base_name: String,
        #[arg(short, long)]
        output: PathBuf,
        /// Check the digest chain while reassembling
        #[arg(long, default_value_t = false)]
        verify: bool,
        #[arg(long, default_value_t = false)]
        progress: bool,
        #[arg(long, default_value_t = false)]
        json: bool,
        #[command(flatten)]
        policy: PolicyArgs,
    },
    /// Check chain, anchor and digest list of a chunk set
    Verify {
        dir: PathBuf,
        #[arg(long)]
        base_name: String,
        #[command(flatten)]
        policy: PolicyArgs,
    },
    /// List a chunk set in index order
    Inspect {
        dir: PathBuf,
        #[arg(long)]
        base_name: String,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Edit an existing manifest
    Manifest {
        #[command(subcommand)]
        cmd: ManifestCmd,
    },
}

#[derive(Subcommand)]
enum ManifestCmd {
    /// Rewrite img_size and img_md5 of the first block with this img_type
    Set {
        path: PathBuf,
        #[arg(long)]
        img_type: String,
        #[arg(long)]
        size: u64,
        #[arg(long)]
        md5: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = CliConfig::load(cli.config.as_deref())?;
    let level = cli.log_level.clone().or_else(|| cfg.log.level.clone()).unwrap_or_else(|| "warn".to_string());
    init_logging(&level);

    match cli.cmd {
        Cmd::Encode {
            image,
            out,
            chunk_size,
            base_name,
            img_type,
            manifest,
            no_manifest,
            ota_version,
            kernel_name,
            kernel_size,
            kernel_md5,
            no_marker,
            progress,
            json,
            policy,
        } => {
            let ota_version = ota_version.or(cfg.encode.ota_version).unwrap_or(0);
            let kernel = match (kernel_name, kernel_size, kernel_md5) {
                (Some(name), Some(size), Some(md5)) => Some(ImageBlock {
                    img_type: "kernel".to_string(),
                    img_name: name,
                    img_size: size,
                    img_md5: parse_digest(&md5)?,
                }),
                _ => None,
            };
            let target = if no_manifest {
                None
            } else {
                let path = manifest.unwrap_or_else(|| out.join(MANIFEST_FILE_NAME));
                Some(ManifestTarget { path, ota_version, extra_blocks: kernel.into_iter().collect() })
            };
            let (anchor, digest_list) = resolve_policy(&policy, &cfg)?;
            let enc = EncoderConfig {
                chunk_size: chunk_size.or(cfg.encode.chunk_size).unwrap_or(DEFAULT_CHUNK_SIZE),
                base_name,
                anchor,
                digest_list,
                img_type: img_type.or_else(|| cfg.encode.img_type.clone()).unwrap_or_else(|| "rootfs".to_string()),
                manifest: target,
                ok_marker: (!no_marker).then(|| format!("ota_v{}.ok", ota_version)),
                progress,
            };
            encode(&image, &out, &enc, json)?;
        }
        Cmd::Decode { dir, base_name, output, verify, progress, json, policy } => {
            let verify = if verify {
                let (anchor, digest_list) = resolve_policy(&policy, &cfg)?;
                Some(VerifyOptions { anchor, digest_list })
            } else {
                None
            };
            let opts = DecodeOptions { verify, progress };
            let rep = Decoder::decode_to_file(&dir, &base_name, &output, &opts)
                .with_context(|| format!("decode {} from {}", base_name, dir.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rep)?);
            } else {
                println!("Wrote {} bytes from {} chunk(s) to {}", rep.total_size, rep.chunk_count, output.display());
                if rep.verified {
                    println!("Chain OK (anchor {})", rep.anchor_digest);
                    if !rep.tail_verified {
                        eprintln!("warning: {}", UNVERIFIED_TAIL);
                    }
                }
            }
        }
        Cmd::Verify { dir, base_name, policy } => {
            let (anchor, digest_list) = resolve_policy(&policy, &cfg)?;
            let rep = verify::verify(&dir, &base_name, VerifyOptions { anchor, digest_list })
                .with_context(|| format!("verify {} in {}", base_name, dir.display()))?;
            eprintln!(
                "Chunks={}, bytes={}, anchor={}, digest list={}",
                rep.chunk_count,
                rep.total_size,
                rep.anchor_digest,
                if rep.digest_list_checked { "OK" } else { "absent" }
            );
            if rep.tail_verified {
                println!("OK");
            } else {
                eprintln!("warning: {}", UNVERIFIED_TAIL);
                println!("OK except last chunk (unverified)");
            }
        }
        Cmd::Inspect { dir, base_name, json } => inspect(&dir, &base_name, json)?,
        Cmd::Manifest { cmd: ManifestCmd::Set { path, img_type, size, md5 } } => {
            manifest_set(&path, &img_type, size, &parse_digest(&md5)?)?
        }
    }
    Ok(())
}

const UNVERIFIED_TAIL: &str =
    "last chunk is not covered by the anchor or the digest list; encode with --anchor whole-image or --digest-list all to cover it";

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_writer(std::io::stderr).with_env_filter(filter).init();
}

fn parse_digest(s: &str) -> Result<Digest> {
    s.parse::<Digest>().map_err(|e| anyhow!("{}", e))
}

fn resolve_policy(args: &PolicyArgs, cfg: &CliConfig) -> Result<(AnchorPolicy, DigestListPolicy)> {
    let anchor = match args.anchor.as_deref().or(cfg.encode.anchor.as_deref()) {
        Some(s) => s.parse()?,
        None => AnchorPolicy::default(),
    };
    let digest_list = match args.digest_list.as_deref().or(cfg.encode.digest_list.as_deref()) {
        Some(s) => s.parse()?,
        None => DigestListPolicy::default(),
    };
    Ok((anchor, digest_list))
}

fn encode(image: &Path, out: &Path, cfg: &EncoderConfig, json: bool) -> Result<()> {
    let res = Encoder::encode(image, out, cfg).with_context(|| format!("encode {}", image.display()))?;
    for w in &res.warnings {
        match w {
            EncodeWarning::NoMatchingBlock { img_type, manifest } => {
                eprintln!("Warning: {} has no img_type={} block, left unchanged", manifest.display(), img_type);
            }
        }
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&res)?);
        return Ok(());
    }
    println!("Output: {}", out.display());
    println!("{}_size: {}", cfg.img_type, res.total_size);
    println!("anchor (img_md5): {}", res.anchor_digest);
    println!("Chunks: {}", res.chunk_count);
    if let Some(first) = res.chunk_paths.first().and_then(|p| p.file_name()) {
        println!("First chunk: {}", first.to_string_lossy());
    }
    Ok(())
}

fn inspect(dir: &Path, base_name: &str, json: bool) -> Result<()> {
    let set = ChunkSet::scan(dir, base_name).with_context(|| format!("scan {}", dir.display()))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&set)?);
        return Ok(());
    }
    println!("{} chunk(s) of {} in {}", set.len(), base_name, dir.display());
    for e in &set.entries {
        let len = fs::metadata(&e.path).map(|m| m.len()).unwrap_or(0);
        println!("  {:04}  {}  {:>8} bytes", e.index, e.filename_digest, len);
    }
    Ok(())
}

fn manifest_set(path: &Path, img_type: &str, size: u64, md5: &Digest) -> Result<()> {
    let text = fs::read_to_string(path).with_context(|| format!("read manifest {}", path.display()))?;
    let mut m = manifest::parse(&text).with_context(|| format!("parse manifest {}", path.display()))?;
    match manifest::update_image_block(&mut m, img_type, size, md5) {
        UpdateOutcome::Updated { block } => {
            fs::write(path, manifest::render(&m)).with_context(|| format!("write manifest {}", path.display()))?;
            println!("Updated block {} (img_type={})", block, img_type);
        }
        UpdateOutcome::NoMatchingBlock { .. } => {
            eprintln!("Warning: {} has no img_type={} block, left unchanged", path.display(), img_type);
        }
    }
    Ok(())
}
