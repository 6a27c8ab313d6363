use super::CodecError;
use camino::Utf8Path;
use md5::{Digest, Md5};
use std::fmt;
use std::fs::File;
use std::io::Read;

const READ_CHUNK: usize = 1024 * 1024;

/// 128-bit MD5 digest over the full bytes of a file
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DiscDigest([u8; 16]);

impl DiscDigest {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Parse a 32 character hex digest (case-insensitive)
    pub fn from_hex(text: &str) -> Result<Self, CodecError> {
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(text.trim(), &mut bytes)
            .map_err(|_| CodecError::InvalidDigest(text.to_string()))?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for DiscDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// The two source builds the patches were made against
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KnownBuild {
    /// Retail UMD dump; needs the compat patch before extraction
    Umd,
    /// PSN download
    Psn,
}

impl fmt::Display for KnownBuild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KnownBuild::Umd => f.write_str("UMD"),
            KnownBuild::Psn => f.write_str("PSN"),
        }
    }
}

/// Accepted digests for each known build
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildTable {
    pub umd: DiscDigest,
    pub psn: DiscDigest,
}

impl BuildTable {
    /// Parse both digests. An empty entry is reported as not configured.
    pub fn from_hex(umd: &str, psn: &str) -> Result<Self, CodecError> {
        Ok(Self {
            umd: configured_digest("umd", umd)?,
            psn: configured_digest("psn", psn)?,
        })
    }

    pub fn identify(&self, digest: &DiscDigest) -> Option<KnownBuild> {
        if *digest == self.umd {
            Some(KnownBuild::Umd)
        } else if *digest == self.psn {
            Some(KnownBuild::Psn)
        } else {
            None
        }
    }
}

fn configured_digest(key: &'static str, text: &str) -> Result<DiscDigest, CodecError> {
    if text.trim().is_empty() {
        return Err(CodecError::DigestNotConfigured(key));
    }
    DiscDigest::from_hex(text)
}

/// Stream a file through MD5.
pub fn hash_of(path: &Utf8Path) -> Result<DiscDigest, CodecError> {
    let mut file = File::open(path).map_err(CodecError::io(path))?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; READ_CHUNK];

    loop {
        let read = file.read(&mut buffer).map_err(CodecError::io(path))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hasher.finalize());
    let digest = DiscDigest(bytes);
    tracing::debug!("MD5 of {}: {}", path, digest);
    Ok(digest)
}
