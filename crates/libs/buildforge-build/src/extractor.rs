//! Archive extractor (§6.3): materialises an uploaded archive into a
//! staging directory and reports its single top-level directory name.
//!
//! Only `.zip` is implemented here; `.rar`/`.7z` are recognised by
//! extension and rejected with `UnsupportedFormat` rather than silently
//! mis-handled, since no vetted pure-Rust crate for those formats exists
//! in the dependency stack.

use std::fs::File;
use std::path::{Path, PathBuf};

use buildforge_core::error::{Error, Result};
use zip::ZipArchive;

/// Outcome of a successful extraction.
#[derive(Debug, Clone)]
pub struct ExtractResult {
    /// Name of the archive's sole top-level directory.
    pub top_level_name: String,
    pub total_files: usize,
}

/// Abstraction over "unpack an archive into a directory", so the Build
/// Pipeline can be exercised with a canned extractor in tests without
/// constructing real zip files for every case.
pub trait ArchiveExtractor: Send + Sync {
    fn extract(&self, archive_path: &Path, dest_dir: &Path) -> Result<ExtractResult>;
}

/// Extracts `.zip` archives via the `zip` crate. Rejects entries that
/// would escape `dest_dir` (`PathTraversal`) and archives that don't
/// resolve to exactly one top-level directory.
pub struct ZipExtractor;

impl ArchiveExtractor for ZipExtractor {
    fn extract(&self, archive_path: &Path, dest_dir: &Path) -> Result<ExtractResult> {
        let extension = archive_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        match extension.as_str() {
            "zip" => {}
            "rar" | "7z" => {
                return Err(Error::ExtractorFailure(format!(
                    "UnsupportedFormat: .{extension} archives are not supported by this extractor"
                )));
            }
            other => {
                return Err(Error::ExtractorFailure(format!(
                    "UnsupportedFormat: unrecognised archive extension '{other}'"
                )));
            }
        }

        let file = File::open(archive_path).map_err(|e| {
            Error::ExtractorFailure(format!("failed to open archive {}: {e}", archive_path.display()))
        })?;
        let mut zip = ZipArchive::new(file)
            .map_err(|e| Error::ExtractorFailure(format!("Corrupt: {e}")))?;

        std::fs::create_dir_all(dest_dir)?;

        let mut top_level_names = std::collections::BTreeSet::new();
        let mut total_files = 0usize;

        for i in 0..zip.len() {
            let mut entry = zip
                .by_index(i)
                .map_err(|e| Error::ExtractorFailure(format!("Corrupt: {e}")))?;
            let Some(relative) = entry.enclosed_name() else {
                return Err(Error::ExtractorFailure(format!(
                    "PathTraversal: entry '{}' escapes the destination directory",
                    entry.name()
                )));
            };

            let mut components = relative.components();
            if let Some(first) = components.next() {
                top_level_names.insert(first.as_os_str().to_string_lossy().into_owned());
            }

            let out_path = dest_dir.join(&relative);
            if !out_path.starts_with(dest_dir) {
                return Err(Error::ExtractorFailure(format!(
                    "PathTraversal: entry '{}' escapes the destination directory",
                    relative.display()
                )));
            }

            if entry.is_dir() {
                std::fs::create_dir_all(&out_path)?;
            } else {
                if let Some(parent) = out_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut out_file = File::create(&out_path)?;
                std::io::copy(&mut entry, &mut out_file)?;
                total_files += 1;
            }
        }

        if top_level_names.len() != 1 {
            return Err(Error::ExtractorFailure(format!(
                "archive must contain exactly one top-level directory, found {}: {:?}",
                top_level_names.len(),
                top_level_names
            )));
        }

        let top_level_name = top_level_names.into_iter().next().expect("checked len == 1");
        Ok(ExtractResult { top_level_name, total_files })
    }
}

/// Canned-result double for pipeline tests.
pub struct FakeExtractor {
    pub result: Result<ExtractResult>,
    /// Directory names to create under `dest_dir` so downstream copy
    /// logic has something to find, mirroring what a real extraction
    /// would leave on disk.
    pub seed_dirs: Vec<PathBuf>,
}

impl FakeExtractor {
    pub fn ok(top_level_name: impl Into<String>, total_files: usize) -> Self {
        let top_level_name = top_level_name.into();
        Self {
            seed_dirs: vec![PathBuf::from(&top_level_name)],
            result: Ok(ExtractResult { top_level_name, total_files }),
        }
    }
}

impl ArchiveExtractor for FakeExtractor {
    fn extract(&self, _archive_path: &Path, dest_dir: &Path) -> Result<ExtractResult> {
        for rel in &self.seed_dirs {
            std::fs::create_dir_all(dest_dir.join(rel))
                .map_err(|e| Error::ExtractorFailure(e.to_string()))?;
        }
        match &self.result {
            Ok(result) => Ok(result.clone()),
            Err(Error::ExtractorFailure(msg)) => Err(Error::ExtractorFailure(msg.clone())),
            Err(other) => Err(Error::ExtractorFailure(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).expect("create zip");
        let mut writer = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();
        for (name, contents) in entries {
            writer.start_file(*name, options).expect("start_file");
            writer.write_all(contents).expect("write contents");
        }
        writer.finish().expect("finish zip");
    }

    #[test]
    fn extracts_single_top_level_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive_path = dir.path().join("sample.zip");
        build_zip(
            &archive_path,
            &[
                ("com.example.app/AndroidManifest.xml", b"<manifest/>"),
                ("com.example.app/src/Main.java", b"class Main {}"),
            ],
        );

        let dest = dir.path().join("out");
        let result = ZipExtractor.extract(&archive_path, &dest).expect("extract");
        assert_eq!(result.top_level_name, "com.example.app");
        assert_eq!(result.total_files, 2);
        assert!(dest.join("com.example.app/AndroidManifest.xml").is_file());
    }

    #[test]
    fn rejects_multiple_top_level_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive_path = dir.path().join("sample.zip");
        build_zip(&archive_path, &[("one/a.txt", b"a"), ("two/b.txt", b"b")]);

        let dest = dir.path().join("out");
        let err = ZipExtractor.extract(&archive_path, &dest).unwrap_err();
        assert!(matches!(err, Error::ExtractorFailure(_)));
    }

    #[test]
    fn rejects_unsupported_extension() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive_path = dir.path().join("sample.rar");
        std::fs::write(&archive_path, b"not really a rar").expect("write");

        let dest = dir.path().join("out");
        let err = ZipExtractor.extract(&archive_path, &dest).unwrap_err();
        assert!(matches!(err, Error::ExtractorFailure(msg) if msg.contains("UnsupportedFormat")));
    }
}
