use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{HarvestError, Result};

const SEGMENT_EXT: &str = "jsonl";

/// Appends JSON lines to `<prefix>.<N>.jsonl`, moving to `N + 1` once the
/// active segment has grown past `max_bytes`.
///
/// The size check runs after each append, so a segment overshoots the
/// threshold by at most one record and no record is ever split.
#[derive(Debug)]
pub struct OutputRotator {
    dir: PathBuf,
    prefix: String,
    max_bytes: u64,
    index: u64,
    current: Option<File>,
    current_size: u64,
}

impl OutputRotator {
    /// Open the rotator, continuing after any segments already in `dir`.
    pub fn open(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        max_bytes: u64,
    ) -> Result<Self> {
        let dir = dir.into();
        let prefix = prefix.into();
        fs::create_dir_all(&dir).map_err(|source| HarvestError::Output {
            path: dir.clone(),
            source,
        })?;

        let mut rotator = Self {
            index: 0,
            current: None,
            current_size: 0,
            max_bytes: max_bytes.max(1),
            dir,
            prefix,
        };

        if let Some(last) = rotator.last_existing_index()? {
            rotator.index = last;
            let path = rotator.current_path();
            rotator.current_size = if path.is_file() {
                trim_torn_tail(&path).map_err(|source| HarvestError::Output {
                    path: path.clone(),
                    source,
                })?
            } else {
                0
            };
            if rotator.current_size > rotator.max_bytes {
                rotator.index += 1;
                rotator.current_size = 0;
            }
            tracing::info!(
                "continuing output at {}",
                rotator.current_path().display()
            );
        }
        Ok(rotator)
    }

    #[must_use]
    pub fn segment_path(&self, index: u64) -> PathBuf {
        self.dir
            .join(format!("{}.{index}.{SEGMENT_EXT}", self.prefix))
    }

    #[must_use]
    pub fn current_path(&self) -> PathBuf {
        self.segment_path(self.index)
    }

    #[must_use]
    pub fn segment_index(&self) -> u64 {
        self.index
    }

    /// Append one serialized record plus a newline, then rotate if the
    /// segment is now over the threshold.
    pub fn append_line(&mut self, line: &str) -> Result<()> {
        let path = self.current_path();
        let wrap = |source| HarvestError::Output {
            path: path.clone(),
            source,
        };

        if self.current.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(wrap)?;
            self.current = Some(file);
        }

        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');

        if let Some(file) = self.current.as_mut() {
            if let Err(e) = file.write_all(&buf).and_then(|()| file.flush()) {
                // Drop whatever part of the line made it to disk.
                if let Err(undo) = file.set_len(self.current_size) {
                    tracing::error!("cannot truncate {}: {undo}", path.display());
                }
                self.current = None;
                return Err(wrap(e));
            }
        }
        self.current_size += buf.len() as u64;

        if self.current_size > self.max_bytes {
            tracing::info!(
                "segment {} reached {} bytes, rotating",
                path.display(),
                self.current_size
            );
            self.current = None;
            self.current_size = 0;
            self.index += 1;
        }
        Ok(())
    }

    fn last_existing_index(&self) -> Result<Option<u64>> {
        let entries = fs::read_dir(&self.dir).map_err(|source| HarvestError::Output {
            path: self.dir.clone(),
            source,
        })?;
        let head = format!("{}.", self.prefix);
        let tail = format!(".{SEGMENT_EXT}");
        let last = entries
            .filter_map(std::result::Result::ok)
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                name.strip_prefix(&head)?
                    .strip_suffix(&tail)?
                    .parse::<u64>()
                    .ok()
            })
            .max();
        Ok(last)
    }
}

/// Cut a segment back to its last complete line.
///
/// A crash in the middle of an append leaves a line without its newline;
/// appending after it would fuse two records. Returns the resulting length.
fn trim_torn_tail(path: &Path) -> std::io::Result<u64> {
    const CHUNK: u64 = 64 * 1024;

    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let len = file.metadata()?.len();
    let mut end = len;
    let mut buf = vec![0u8; CHUNK as usize];
    let mut keep = 0;
    while end > 0 {
        let start = end.saturating_sub(CHUNK);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(chunk)?;
        if let Some(pos) = chunk.iter().rposition(|&b| b == b'\n') {
            keep = start + pos as u64 + 1;
            break;
        }
        end = start;
    }

    if keep < len {
        tracing::warn!(
            "dropping {} bytes of incomplete record at the end of {}",
            len - keep,
            path.display()
        );
        file.set_len(keep)?;
    }
    Ok(keep)
}

/// List segment files for `prefix` in `dir`, ordered by index.
pub fn list_segments(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let head = format!("{prefix}.");
    let tail = format!(".{SEGMENT_EXT}");
    let mut found: Vec<(u64, PathBuf)> = fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            let index = name.strip_prefix(&head)?.strip_suffix(&tail)?.parse().ok()?;
            Some((index, e.path()))
        })
        .collect();
    found.sort_by_key(|(index, _)| *index);
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn line(n: usize) -> String {
        // 9 bytes + newline = 10 bytes on disk
        format!("{{\"n\":{n:03}}}")
    }

    #[test]
    fn appends_to_segment_zero() {
        let tmp = TempDir::new().unwrap();
        let mut out = OutputRotator::open(tmp.path(), "github", 1024).unwrap();
        out.append_line(&line(1)).unwrap();
        out.append_line(&line(2)).unwrap();

        let content = fs::read_to_string(tmp.path().join("github.0.jsonl")).unwrap();
        assert_eq!(content, "{\"n\":001}\n{\"n\":002}\n");
        assert_eq!(out.segment_index(), 0);
    }

    #[test]
    fn rotates_after_threshold_is_exceeded() {
        let tmp = TempDir::new().unwrap();
        let mut out = OutputRotator::open(tmp.path(), "github", 25).unwrap();
        for n in 0..7 {
            out.append_line(&line(n)).unwrap();
        }
        // 30 bytes > 25 after the third line, so segments hold 3, 3, 1 lines.
        let segments = list_segments(tmp.path(), "github").unwrap();
        assert_eq!(segments.len(), 3);
        let counts: Vec<usize> = segments
            .iter()
            .map(|p| fs::read_to_string(p).unwrap().lines().count())
            .collect();
        assert_eq!(counts, vec![3, 3, 1]);
    }

    #[test]
    fn records_are_never_split() {
        let tmp = TempDir::new().unwrap();
        let mut out = OutputRotator::open(tmp.path(), "p", 5).unwrap();
        let long = "x".repeat(40);
        out.append_line(&long).unwrap();
        out.append_line(&long).unwrap();

        for path in list_segments(tmp.path(), "p").unwrap() {
            let content = fs::read_to_string(path).unwrap();
            assert_eq!(content, format!("{long}\n"));
        }
    }

    #[test]
    fn exactly_at_threshold_does_not_rotate() {
        let tmp = TempDir::new().unwrap();
        let mut out = OutputRotator::open(tmp.path(), "p", 20).unwrap();
        out.append_line(&line(1)).unwrap();
        out.append_line(&line(2)).unwrap();
        assert_eq!(out.segment_index(), 0);
        out.append_line(&line(3)).unwrap();
        assert_eq!(out.segment_index(), 1);
    }

    #[test]
    fn reopen_continues_last_segment() {
        let tmp = TempDir::new().unwrap();
        {
            let mut out = OutputRotator::open(tmp.path(), "github", 25).unwrap();
            for n in 0..4 {
                out.append_line(&line(n)).unwrap();
            }
            assert_eq!(out.segment_index(), 1);
        }

        let mut out = OutputRotator::open(tmp.path(), "github", 25).unwrap();
        assert_eq!(out.segment_index(), 1);
        out.append_line(&line(9)).unwrap();
        let seg1 = fs::read_to_string(tmp.path().join("github.1.jsonl")).unwrap();
        assert_eq!(seg1.lines().count(), 2);
        // Earlier output untouched.
        let seg0 = fs::read_to_string(tmp.path().join("github.0.jsonl")).unwrap();
        assert_eq!(seg0.lines().count(), 3);
    }

    #[test]
    fn reopen_skips_full_segment() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("g.3.jsonl"), format!("{}\n", "x".repeat(100))).unwrap();
        fs::write(tmp.path().join("other.9.jsonl"), "x").unwrap();
        let out = OutputRotator::open(tmp.path(), "g", 50).unwrap();
        assert_eq!(out.segment_index(), 4);
    }

    #[test]
    fn prefix_with_dots_is_parsed() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("google.src.2.jsonl"), "x\n").unwrap();
        let out = OutputRotator::open(tmp.path(), "google.src", 50).unwrap();
        assert_eq!(out.segment_index(), 2);
    }

    #[test]
    fn reopen_drops_torn_tail() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("github.0.jsonl"),
            "{\"a\":1}\n{\"platform\":\"gi",
        )
        .unwrap();

        let mut out = OutputRotator::open(tmp.path(), "github", 1024).unwrap();
        out.append_line("{\"b\":2}").unwrap();

        let content = fs::read_to_string(tmp.path().join("github.0.jsonl")).unwrap();
        assert_eq!(content, "{\"a\":1}\n{\"b\":2}\n");
        for line in content.lines() {
            serde_json::from_str::<serde_json::Value>(line).unwrap();
        }
    }

    #[test]
    fn torn_tail_without_any_newline_is_emptied() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("p.0.jsonl");
        fs::write(&path, "x".repeat(100_000)).unwrap();

        let mut out = OutputRotator::open(tmp.path(), "p", 1024 * 1024).unwrap();
        assert_eq!(out.segment_index(), 0);
        out.append_line(&line(1)).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"n\":001}\n");
    }

    #[test]
    fn trim_finds_newline_across_chunks() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("p.0.jsonl");
        let mut content = "a".repeat(10);
        content.push('\n');
        content.push_str(&"b".repeat(200_000));
        fs::write(&path, &content).unwrap();

        assert_eq!(trim_torn_tail(&path).unwrap(), 11);
        assert_eq!(fs::metadata(&path).unwrap().len(), 11);
    }

    #[test]
    fn unwritable_segment_fails_on_append() {
        let tmp = TempDir::new().unwrap();
        let mut out = OutputRotator::open(tmp.path(), "g", 1024).unwrap();
        fs::create_dir(tmp.path().join("g.0.jsonl")).unwrap();
        let err = out.append_line(&line(1)).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn unwritable_output_is_an_output_error() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("file");
        fs::write(&blocker, "x").unwrap();
        let err = OutputRotator::open(blocker.join("out"), "g", 10).unwrap_err();
        assert!(err.is_fatal());
    }
}
