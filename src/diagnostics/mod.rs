//! Best-effort crash notes.
//!
//! When the broker connection misbehaves the publisher appends a short note to
//! `<dir>/<process>.stack`, so an operator still has a trace when the log
//! pipeline itself is what failed. Writing the note must never fail the caller:
//! I/O errors are reported through `tracing` and otherwise dropped. Inside a
//! tokio runtime the write happens on the blocking pool.

use std::fmt::Display;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};

/// Appends diagnostic notes for one process.
#[derive(Debug, Clone)]
pub struct CrashNotes {
    path: PathBuf,
    process: String,
    pid: u32,
}

impl CrashNotes {
    pub fn new(dir: impl AsRef<Path>, process: impl Into<String>) -> Self {
        let process = process.into();
        Self {
            path: dir.as_ref().join(format!("{process}.stack")),
            process,
            pid: std::process::id(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records `context`, optionally followed by the error that triggered it.
    pub fn record(&self, context: &str, err: Option<&dyn Display>) {
        let mut note = format!(
            "{} {}[{}] {}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            self.process,
            self.pid,
            context
        );
        if let Some(err) = err {
            note.push_str(&format!("{err}\n"));
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let path = self.path.clone();
                runtime.spawn_blocking(move || append(&path, &note));
            }
            Err(_) => append(&self.path, &note),
        }
    }
}

fn append(path: &Path, note: &str) {
    let written = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| file.write_all(note.as_bytes()));

    if let Err(e) = written {
        tracing::error!(path = %path.display(), error = %e, "{}", note.trim_end());
    }
}

/// Base name of the running executable, used as the `Process` header.
pub fn process_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .or_else(|| {
            std::env::args().next().and_then(|arg0| {
                Path::new(&arg0)
                    .file_name()
                    .map(|s| s.to_string_lossy().into_owned())
            })
        })
        .unwrap_or_else(|| "unknown".to_string())
}
