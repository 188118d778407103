//! Content digests.
//!
//! BLAKE3 identifies file content inside the hash index; SHA-256 (lowercase
//! hex) feeds cache-key derivation. Both hash from a [`Read`] so memory stays
//! bounded no matter how large the input is.

use crate::error::{ErrorKind, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use exn::ResultExt;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

/// BLAKE3 digest of a file's content, rendered as standard base64.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; blake3::OUT_LEN]);

impl ContentHash {
    pub fn from_reader(mut reader: impl Read) -> io::Result<Self> {
        let mut hasher = blake3::Hasher::new();
        io::copy(&mut reader, &mut hasher)?;
        Ok(Self(*hasher.finalize().as_bytes()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path).or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
        Self::from_reader(file).or_raise(|| ErrorKind::Io(path.to_path_buf()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&BASE64.encode(self.0))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({self})")
    }
}

impl FromStr for ContentHash {
    type Err = ErrorKind;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = BASE64.decode(s).map_err(|_| ErrorKind::InvalidIndex)?;
        let bytes: [u8; blake3::OUT_LEN] = bytes.try_into().map_err(|_| ErrorKind::InvalidIndex)?;
        Ok(Self(bytes))
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(serde::de::Error::custom)
    }
}

/// SHA-256 of everything `reader` yields, as lowercase hex.
pub fn sha256_reader(mut reader: impl Read) -> io::Result<String> {
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn sha256_str(value: &str) -> io::Result<String> {
    sha256_reader(value.as_bytes())
}
