use std::fmt;

/// 128-bit content digest (MD5) of a file's raw bytes.
///
/// Identity only: resumability and the `md5` output field. Never used for
/// anything security related.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest128([u8; 16]);

impl Digest128 {
    /// Lowercase hex, 32 chars.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Digest128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&md5::Digest(self.0), f)
    }
}

/// Compute the digest of a byte slice. Independent of any decoding outcome.
#[must_use]
pub fn digest(data: &[u8]) -> Digest128 {
    Digest128(md5::compute(data).0)
}

/// Hex digest of an arbitrary string, used to derive stable file names.
#[must_use]
pub fn hash_str(s: &str) -> String {
    digest(s.as_bytes()).to_hex()
}
