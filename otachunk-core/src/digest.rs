use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use md5::{Digest as _, Md5};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{OtaError, Result};

/// Length of a rendered digest: 16 MD5 bytes as lowercase hex.
pub const DIGEST_HEX_LEN: usize = 32;

/// An MD5 content digest, rendered as 32 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; 16]);

impl Digest {
    pub fn of(data: &[u8]) -> Self {
        Digest(Md5::digest(data).into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// True when `s` has the exact shape of a rendered digest.
    pub fn looks_like(s: &str) -> bool {
        s.len() == DIGEST_HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
    }
}

impl FromStr for Digest {
    type Err = OtaError;

    fn from_str(s: &str) -> Result<Self> {
        if !Digest::looks_like(s) {
            return Err(OtaError::InvalidDigest(s.to_string()));
        }
        let mut out = [0u8; 16];
        hex::decode_to_slice(s, &mut out).map_err(|_| OtaError::InvalidDigest(s.to_string()))?;
        Ok(Digest(out))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Incremental MD5 over a byte stream fed in pieces.
#[derive(Clone, Default)]
pub struct Hasher(Md5);

impl Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> Digest {
        Digest(self.0.finalize().into())
    }
}

/// Digest of a whole file, read in 1 MiB pieces.
pub fn digest_file(path: &Path) -> Result<Digest> {
    let mut f = File::open(path).map_err(|e| OtaError::io(path, e))?;
    let mut hasher = Hasher::new();
    let mut buf = vec![0u8; 1 << 20];
    loop {
        let n = f.read(&mut buf).map_err(|e| OtaError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_md5_vectors() {
        assert_eq!(Digest::of(b"").to_hex(), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(Digest::of(b"abc").to_hex(), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn parse_normalizes_case_and_rejects_bad_shapes() {
        let d: Digest = "900150983CD24FB0D6963F7D28E17F72".parse().unwrap();
        assert_eq!(d.to_string(), "900150983cd24fb0d6963f7d28e17f72");
        assert!("900150983cd24fb0".parse::<Digest>().is_err());
        assert!("zz0150983cd24fb0d6963f7d28e17f72".parse::<Digest>().is_err());
    }

    #[test]
    fn incremental_matches_one_shot() {
        let mut h = Hasher::new();
        h.update(b"a");
        h.update(b"bc");
        assert_eq!(h.finalize(), Digest::of(b"abc"));
    }
}
