//! Source encoding detection.
//!
//! Detection is a pluggable capability behind [`EncodingDetector`]. The
//! default [`ContentSniffer`] combines BOM sniffing, a binary heuristic,
//! strict UTF-8 validation and `chardetng` for legacy encodings.

use encoding_rs::{Encoding, UTF_8};

/// Bytes inspected by the binary heuristic.
const SNIFF_LEN: usize = 8192;

/// Classifies raw bytes into a source encoding, or `None` when undetectable.
///
/// Implementations must be pure and must not panic on arbitrary input.
pub trait EncodingDetector: Send + Sync {
    fn detect(&self, raw: &[u8]) -> Option<&'static Encoding>;
}

/// Lowercase label written to the `source_encoding` field (e.g. `utf-8`, `gbk`).
#[must_use]
pub fn encoding_label(encoding: &'static Encoding) -> String {
    encoding.name().to_ascii_lowercase()
}

/// Resolve a user-supplied WHATWG label such as `utf8` or `GB2312`.
#[must_use]
pub fn encoding_for_label(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
}

/// Default detector.
#[derive(Debug, Clone)]
pub struct ContentSniffer {
    /// A sample with more than `1 / max_control_ratio` stray control bytes is binary.
    max_control_ratio: usize,
}

impl Default for ContentSniffer {
    fn default() -> Self {
        Self {
            max_control_ratio: 10,
        }
    }
}

impl ContentSniffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn looks_binary(&self, sample: &[u8]) -> bool {
        if sample.contains(&0) {
            return true;
        }
        let stray = sample
            .iter()
            .filter(|&&b| b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r' | 0x0c | 0x1b))
            .count();
        stray * self.max_control_ratio > sample.len()
    }
}

impl EncodingDetector for ContentSniffer {
    fn detect(&self, raw: &[u8]) -> Option<&'static Encoding> {
        if raw.is_empty() {
            return Some(UTF_8);
        }

        // An explicit BOM wins, as long as the body actually decodes.
        if let Some((encoding, bom_len)) = Encoding::for_bom(raw) {
            return encoding
                .decode_without_bom_handling_and_without_replacement(&raw[bom_len..])
                .map(|_| encoding);
        }

        let sample = &raw[..raw.len().min(SNIFF_LEN)];
        if self.looks_binary(sample) {
            return None;
        }

        if std::str::from_utf8(raw).is_ok() {
            return Some(UTF_8);
        }

        let mut detector = chardetng::EncodingDetector::new();
        detector.feed(raw, true);
        let guess = detector.guess(None, false);

        // A guess that cannot decode the whole file is below threshold.
        guess
            .decode_without_bom_handling_and_without_replacement(raw)
            .map(|_| guess)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(raw: &[u8]) -> Option<String> {
        ContentSniffer::new().detect(raw).map(encoding_label)
    }

    #[test]
    fn ascii_and_utf8_are_utf8() {
        assert_eq!(detect(b"int main(){return;}\n").as_deref(), Some("utf-8"));
        assert_eq!(
            detect("fn main() { println!(\"héllo 世界\"); }".as_bytes()).as_deref(),
            Some("utf-8")
        );
    }

    #[test]
    fn empty_file_is_utf8() {
        assert_eq!(detect(b"").as_deref(), Some("utf-8"));
    }

    #[test]
    fn png_header_is_undetectable() {
        let png = [
            0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n', 0, 0, 0, 13, b'I', b'H', b'D', b'R',
        ];
        assert_eq!(detect(&png), None);
    }

    #[test]
    fn control_heavy_data_is_undetectable() {
        let garbage: Vec<u8> = (0..200u8).map(|i| (i % 8) + 1).collect();
        assert_eq!(detect(&garbage), None);
    }

    #[test]
    fn utf16_with_bom_is_detected() {
        let mut raw = vec![0xff, 0xfe];
        for unit in "hello".encode_utf16() {
            raw.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(detect(&raw).as_deref(), Some("utf-16le"));
    }

    #[test]
    fn gbk_text_is_detected() {
        let text = "中文编码测试：这是一段用于检测的简体中文文本。\
                    我们需要足够多的汉字，检测器才能做出可靠的判断。\
                    源代码仓库里经常出现这种使用国标编码保存的注释和文档。";
        let (raw, _, unmappable) = encoding_rs::GBK.encode(text);
        assert!(!unmappable);
        assert_eq!(detect(&raw).as_deref(), Some("gbk"));
    }

    #[test]
    fn labels_resolve() {
        assert_eq!(encoding_for_label("utf8"), Some(UTF_8));
        assert_eq!(encoding_for_label(" UTF-8 "), Some(UTF_8));
        assert_eq!(encoding_for_label("gb2312"), Some(encoding_rs::GBK));
        assert_eq!(encoding_for_label("no-such-charset"), None);
    }
}
