use serde::Serialize;

/// One normalized file, as produced by the record builder.
///
/// Only files whose encoding was detected and whose text normalized
/// successfully become a `FileRecord`; repository-level metadata is added
/// by the harvester through [`CorpusLine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    /// Base name including extension (`main.c`).
    pub name: String,
    /// Final suffix with its dot (`.c`), empty when there is none.
    pub ext: String,
    /// Repository-relative path (forward slashes).
    pub path: String,
    /// Raw byte length.
    pub size: u64,
    /// Detected source encoding label.
    pub source_encoding: String,
    /// Hex MD5 of the raw bytes.
    pub md5: String,
    /// Content decoded and normalized to the target encoding.
    pub text: String,
}

/// A serialized output row: repository metadata followed by the record.
#[derive(Debug, Serialize)]
pub struct CorpusLine<'a> {
    pub platform: &'a str,
    pub repo_name: &'a str,
    #[serde(flatten)]
    pub file: &'a FileRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<&'a str>,
}

impl CorpusLine<'_> {
    /// Serialize as one JSON line (no trailing newline).
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
