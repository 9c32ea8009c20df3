//! Repository sources: discovery, archive extraction and cleanup.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

use crate::config::SourceKind;
use crate::error::{HarvestError, Result};
use crate::ingest::hasher;

/// Prefix of directories archives are extracted into.
pub const EXTRACT_PREFIX: &str = "zipout-";

/// One repository to harvest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoSource {
    /// A zip archive, extracted before scanning.
    Archive(PathBuf),
    /// An already extracted directory tree.
    Directory(PathBuf),
}

impl RepoSource {
    /// Classify a path: directories are trees, anything else an archive.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.is_dir() {
            Ok(RepoSource::Directory(path))
        } else if path.is_file() {
            Ok(RepoSource::Archive(path))
        } else {
            Err(HarvestError::RootNotFound {
                path: path.display().to_string(),
            })
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            RepoSource::Archive(p) | RepoSource::Directory(p) => p,
        }
    }

    /// Archive stem or directory name.
    #[must_use]
    pub fn root_name(&self) -> String {
        let name = match self {
            RepoSource::Archive(p) => p.file_stem(),
            RepoSource::Directory(p) => p.file_name(),
        };
        name.map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Find all repository sources under `input`.
///
/// Sorted by path so repeated runs visit sources in the same order.
pub fn discover_sources(input: &Path, kind: SourceKind) -> Result<Vec<RepoSource>> {
    if !input.is_dir() {
        return Err(HarvestError::RootNotFound {
            path: input.display().to_string(),
        });
    }

    let mut sources: Vec<RepoSource> = match kind {
        SourceKind::Zip => WalkBuilder::new(input)
            .standard_filters(false)
            .follow_links(false)
            .build()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_some_and(|ft| ft.is_file()))
            .filter(|e| {
                e.path()
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
            })
            .map(|e| RepoSource::Archive(e.into_path()))
            .collect(),
        SourceKind::Dir => fs::read_dir(input)?
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_ok_and(|ft| ft.is_dir()))
            .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
            .map(|e| RepoSource::Directory(e.path()))
            .collect(),
    };

    sources.sort_by(|a, b| a.path().cmp(b.path()));
    Ok(sources)
}

/// Directory an archive is extracted into:
/// `<root>/zipout-<stem>-<8 hex digits of the archive path digest>`, where
/// `root` defaults to the archive's own directory.
///
/// The digest suffix keeps same-stem archives from different directories
/// apart when they share an extraction root.
#[must_use]
pub fn extraction_dir(archive: &Path, extract_root: Option<&Path>) -> PathBuf {
    let stem = archive
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let identity = fs::canonicalize(archive).unwrap_or_else(|_| archive.to_path_buf());
    let digest = hasher::hash_str(&identity.display().to_string());
    let root = extract_root
        .or_else(|| archive.parent())
        .unwrap_or_else(|| Path::new("."));
    root.join(format!("{EXTRACT_PREFIX}{stem}-{}", &digest[..8]))
}

/// Extract a zip archive into `dest`, overwriting what a previous,
/// interrupted extraction left behind.
pub fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)?;
    fs::create_dir_all(dest)?;
    zip.extract(dest)?;
    Ok(())
}

/// Remove an extracted tree. Missing trees are fine.
pub fn remove_tree(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Delete the original archive or directory.
pub fn remove_source(source: &RepoSource) -> Result<()> {
    match source {
        RepoSource::Archive(p) => fs::remove_file(p)?,
        RepoSource::Directory(p) => remove_tree(p)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn discover_zip_sources_recursively() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("batch/2")).unwrap();
        fs::write(tmp.path().join("b.zip"), "x").unwrap();
        fs::write(tmp.path().join("batch/2/a.ZIP"), "x").unwrap();
        fs::write(tmp.path().join("notes.txt"), "x").unwrap();

        let sources = discover_sources(tmp.path(), SourceKind::Zip).unwrap();
        assert_eq!(sources.len(), 2);
        assert!(sources
            .iter()
            .all(|s| matches!(s, RepoSource::Archive(_))));
        assert_eq!(sources[0].root_name(), "b");
        assert_eq!(sources[1].root_name(), "a");
    }

    #[test]
    fn discover_dir_sources_skips_files_and_hidden() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("repo-b")).unwrap();
        fs::create_dir(tmp.path().join("repo-a")).unwrap();
        fs::create_dir(tmp.path().join(".cache")).unwrap();
        fs::write(tmp.path().join("stray.txt"), "x").unwrap();

        let sources = discover_sources(tmp.path(), SourceKind::Dir).unwrap();
        let names: Vec<String> = sources.iter().map(RepoSource::root_name).collect();
        assert_eq!(names, vec!["repo-a", "repo-b"]);
    }

    #[test]
    fn discover_missing_input_errors() {
        let tmp = TempDir::new().unwrap();
        assert!(discover_sources(&tmp.path().join("nope"), SourceKind::Zip).is_err());
    }

    #[test]
    fn extraction_dir_naming() {
        let suffix = &hasher::hash_str("/data/zips/123.zip")[..8];
        assert_eq!(
            extraction_dir(Path::new("/data/zips/123.zip"), None),
            PathBuf::from(format!("/data/zips/zipout-123-{suffix}"))
        );
        assert_eq!(
            extraction_dir(Path::new("/data/zips/123.zip"), Some(Path::new("/scratch"))),
            PathBuf::from(format!("/scratch/zipout-123-{suffix}"))
        );
    }

    #[test]
    fn same_stem_archives_get_distinct_dirs() {
        let scratch = Path::new("/scratch");
        let a = extraction_dir(Path::new("/zips/a/foo.zip"), Some(scratch));
        let b = extraction_dir(Path::new("/zips/b/foo.zip"), Some(scratch));
        assert_ne!(a, b);
        assert!(a.starts_with(scratch) && b.starts_with(scratch));
    }

    #[test]
    fn extract_and_remove() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("foo.zip");
        write_zip(&archive, &[("foo-main/src/main.c", b"int main(){return;}\n")]);

        let dest = extraction_dir(&archive, None);
        extract_zip(&archive, &dest).unwrap();
        assert!(dest.join("foo-main/src/main.c").is_file());

        // Re-extracting over a partial tree works.
        extract_zip(&archive, &dest).unwrap();

        remove_tree(&dest).unwrap();
        assert!(!dest.exists());
        remove_tree(&dest).unwrap();
    }

    #[test]
    fn corrupt_archive_is_a_zip_error() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("broken.zip");
        fs::write(&archive, b"definitely not a zip").unwrap();
        let err = extract_zip(&archive, &tmp.path().join("out")).unwrap_err();
        assert!(matches!(err, HarvestError::Zip(_)));
    }

    #[test]
    fn remove_source_handles_both_kinds() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("a.zip");
        fs::write(&archive, "x").unwrap();
        let dir = tmp.path().join("repo");
        fs::create_dir_all(dir.join("src")).unwrap();

        remove_source(&RepoSource::from_path(&archive).unwrap()).unwrap();
        remove_source(&RepoSource::from_path(&dir).unwrap()).unwrap();
        assert!(!archive.exists());
        assert!(!dir.exists());
    }
}
