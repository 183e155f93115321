//! Durable manifest of (source, derived) associations.
//!
//! The manifest is a flat UTF-8 text file at `{root}/watcher.manifest`, one
//! newline-terminated record per line, the two root-relative paths joined by
//! `;`. Records are appended on registration and re-read in full on restore;
//! the file is never rewritten or compacted.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Lines, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Default manifest file name, resolved against the root directory.
pub const MANIFEST_FILE: &str = "watcher.manifest";

const SEPARATOR: char = ';';

/// Errors from manifest access.
#[derive(Error, Debug)]
pub enum ManifestError {
    /// Recoverable: callers treat a missing manifest as "no prior associations".
    #[error("no manifest found at {path}")]
    Missing { path: PathBuf },

    /// The offending line is skipped; later lines remain readable.
    #[error("manifest line {line} is missing the ';' separator: {content:?}")]
    CorruptLine { line: usize, content: String },

    /// The format has no escaping, so paths containing the separator cannot
    /// be represented.
    #[error("path {path} contains ';' and cannot be stored in the manifest")]
    UnsupportedPath { path: PathBuf },

    #[error("manifest I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One persisted association, both paths root-relative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRecord {
    pub source: PathBuf,
    pub derived: PathBuf,
}

/// Reads and appends manifest records under a root directory.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    file_name: String,
}

impl ManifestStore {
    pub fn new() -> Self {
        Self::with_file_name(MANIFEST_FILE)
    }

    /// Use a non-default manifest file name (configurable via settings).
    pub fn with_file_name(name: impl Into<String>) -> Self {
        Self {
            file_name: name.into(),
        }
    }

    /// Full path of the manifest under `root`.
    pub fn manifest_path(&self, root: &Path) -> PathBuf {
        root.join(&self.file_name)
    }

    /// Lazily iterate the records persisted under `root`.
    ///
    /// Each call re-opens the file, so the sequence is restartable. Corrupt
    /// lines surface as `Err` items; iteration continues past them.
    pub fn load(&self, root: &Path) -> Result<Records, ManifestError> {
        let path = self.manifest_path(root);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ManifestError::Missing { path });
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Records {
            lines: BufReader::new(file).lines(),
            line: 0,
        })
    }

    /// Append one association, creating the manifest if needed.
    ///
    /// The record is written newline-terminated in a single `write_all` on an
    /// append-mode handle, so an interrupted writer cannot tear an earlier
    /// record; the handle is flushed and closed on every exit path.
    pub fn append(
        &self,
        root: &Path,
        relative_source: &Path,
        relative_derived: &Path,
    ) -> Result<(), ManifestError> {
        for path in [relative_source, relative_derived] {
            if path.to_string_lossy().contains(SEPARATOR) {
                return Err(ManifestError::UnsupportedPath {
                    path: path.to_path_buf(),
                });
            }
        }

        let record = format!(
            "{}{SEPARATOR}{}\n",
            relative_source.display(),
            relative_derived.display()
        );
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.manifest_path(root))?;
        file.write_all(record.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

impl Default for ManifestStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy iterator over manifest records.
#[derive(Debug)]
pub struct Records {
    lines: Lines<BufReader<File>>,
    line: usize,
}

impl Iterator for Records {
    type Item = Result<ManifestRecord, ManifestError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let Some((source, derived)) = trimmed.split_once(SEPARATOR) else {
                return Some(Err(ManifestError::CorruptLine {
                    line: self.line,
                    content: line,
                }));
            };
            return Some(Ok(ManifestRecord {
                source: PathBuf::from(source),
                derived: PathBuf::from(derived),
            }));
        }
    }
}
