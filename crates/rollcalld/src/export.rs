//! CSV export of a finalized session.
//!
//! One row per known identity, in name order, marked `Present` or `Absent`.
//! Present rows carry the commit timestamp.

use crate::registry::Registry;
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const HEADER: &str = "name,status,age,contact,timestamp";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub struct CsvExporter {
    dir: PathBuf,
}

impl CsvExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write `attendance_<stamp>.csv`, never overwriting an earlier export.
    ///
    /// `file_stamp` is `YYYYmmdd_HHMMSS`; `timestamp` is what present rows show.
    pub fn write(
        &self,
        registry: &Registry,
        present: &BTreeSet<String>,
        file_stamp: &str,
        timestamp: &str,
    ) -> Result<PathBuf, ExportError> {
        let contents = render(registry, present, timestamp);

        let mut attempt = 0u32;
        loop {
            let name = match attempt {
                0 => format!("attendance_{file_stamp}.csv"),
                n => format!("attendance_{file_stamp}_{n}.csv"),
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let written = file.write_all(contents.as_bytes()).and_then(|_| file.sync_all());
                    if let Err(source) = written {
                        self.remove(&path);
                        return Err(ExportError::Io { path, source });
                    }
                    tracing::info!(path = %path.display(), rows = registry.len(), "attendance exported");
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempt < 100 => attempt += 1,
                Err(source) => return Err(ExportError::Io { path, source }),
            }
        }
    }

    /// Best-effort removal of an export whose commit was rolled back.
    pub fn remove(&self, path: &Path) {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove export");
        }
    }
}

fn render(registry: &Registry, present: &BTreeSet<String>, timestamp: &str) -> String {
    let mut out = String::with_capacity(HEADER.len() + 1 + registry.len() * 48);
    out.push_str(HEADER);
    out.push_str("\r\n");
    for identity in registry.identities() {
        let is_present = present.contains(&identity.name);
        let fields = [
            csv_field(&identity.name),
            Cow::Borrowed(if is_present { "Present" } else { "Absent" }),
            Cow::Owned(identity.age.to_string()),
            csv_field(&identity.contact),
            Cow::Borrowed(if is_present { timestamp } else { "" }),
        ];
        out.push_str(&fields.join(","));
        out.push_str("\r\n");
    }
    out
}

/// RFC 4180 quoting: wrap in quotes when needed, doubling inner quotes.
fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\r', '\n']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}
