//! `ota_update.in`: blocks of `key=value` lines separated by blank lines.
//!
//! ```text
//! ota_version=0
//!
//! img_type=kernel
//! img_name=xImage
//! img_size=3598272
//! img_md5=...
//!
//! img_type=rootfs
//! img_name=rootfs.squashfs
//! img_size=33927877
//! img_md5=...
//!
//! ```

use serde::Serialize;
use tracing::{debug, warn};

use crate::digest::Digest;
use crate::error::{OtaError, Result};

pub const KEY_OTA_VERSION: &str = "ota_version";
pub const KEY_IMG_TYPE: &str = "img_type";
pub const KEY_IMG_NAME: &str = "img_name";
pub const KEY_IMG_SIZE: &str = "img_size";
pub const KEY_IMG_MD5: &str = "img_md5";

pub const MANIFEST_FILE_NAME: &str = "ota_update.in";

/// One block; fields keep their insertion order.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ManifestRecord {
    pub fields: Vec<(String, String)>,
}

impl ManifestRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.set(key, value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Replace the first `key` in place, or append it when absent.
    pub fn set(&mut self, key: &str, value: String) {
        match self.fields.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.fields.push((key.to_string(), value)),
        }
    }

    pub fn img_type(&self) -> Option<&str> {
        self.get(KEY_IMG_TYPE)
    }
}

#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Manifest {
    pub records: Vec<ManifestRecord>,
}

/// Description of one image, used to build a fresh manifest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageBlock {
    pub img_type: String,
    pub img_name: String,
    pub img_size: u64,
    pub img_md5: Digest,
}

impl From<&ImageBlock> for ManifestRecord {
    fn from(b: &ImageBlock) -> Self {
        ManifestRecord::new()
            .with(KEY_IMG_TYPE, &b.img_type)
            .with(KEY_IMG_NAME, &b.img_name)
            .with(KEY_IMG_SIZE, b.img_size)
            .with(KEY_IMG_MD5, b.img_md5)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Block at this position was rewritten.
    Updated { block: usize },
    /// No block has the requested `img_type`; nothing changed.
    NoMatchingBlock { img_type: String },
}

impl Manifest {
    /// Leading `ota_version` block followed by one block per image.
    pub fn for_ota(ota_version: u32, images: &[ImageBlock]) -> Self {
        let mut records = vec![ManifestRecord::new().with(KEY_OTA_VERSION, ota_version)];
        records.extend(images.iter().map(ManifestRecord::from));
        Manifest { records }
    }

    /// First block whose `img_type` equals `img_type`.
    pub fn find(&self, img_type: &str) -> Option<&ManifestRecord> {
        self.records.iter().find(|r| r.img_type() == Some(img_type))
    }

    pub fn ota_version(&self) -> Option<&str> {
        self.records.iter().find_map(|r| r.get(KEY_OTA_VERSION))
    }
}

pub fn parse(text: &str) -> Result<Manifest> {
    let mut records = Vec::new();
    let mut cur = ManifestRecord::new();
    for (i, raw) in text.lines().enumerate() {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if line.trim().is_empty() {
            if !cur.fields.is_empty() {
                records.push(std::mem::take(&mut cur));
            }
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(OtaError::MalformedManifest {
                line: i + 1,
                reason: format!("expected key=value, got {:?}", line),
            });
        };
        if key.is_empty() {
            return Err(OtaError::MalformedManifest { line: i + 1, reason: "empty key".into() });
        }
        cur.fields.push((key.to_string(), value.to_string()));
    }
    if !cur.fields.is_empty() {
        records.push(cur);
    }
    Ok(Manifest { records })
}

pub fn render(manifest: &Manifest) -> String {
    let mut out = String::new();
    for (i, rec) in manifest.records.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        for (k, v) in &rec.fields {
            out.push_str(k);
            out.push('=');
            out.push_str(v);
            out.push('\n');
        }
    }
    if !manifest.records.is_empty() {
        out.push('\n');
    }
    out
}

/// Rewrite `img_size` and `img_md5` of the first block with this `img_type`.
pub fn update_image_block(
    manifest: &mut Manifest,
    img_type: &str,
    new_size: u64,
    new_digest: &Digest,
) -> UpdateOutcome {
    let Some(block) = manifest.records.iter().position(|r| r.img_type() == Some(img_type)) else {
        warn!(img_type, "manifest has no block for image type, left unchanged");
        return UpdateOutcome::NoMatchingBlock { img_type: img_type.to_string() };
    };
    let dupes = manifest.records.iter().filter(|r| r.img_type() == Some(img_type)).count();
    if dupes > 1 {
        warn!(img_type, dupes, "several blocks share the image type, updating the first");
    }
    let rec = &mut manifest.records[block];
    rec.set(KEY_IMG_SIZE, new_size.to_string());
    rec.set(KEY_IMG_MD5, new_digest.to_string());
    debug!(img_type, block, new_size, %new_digest, "manifest block updated");
    UpdateOutcome::Updated { block }
}
