//! Zip-based backup and restore of the data store and audit artifacts.
//!
//! Archives are flat: every entry is the base file name of the original, so
//! a restore extracts into a staging directory and then moves each file to
//! its real destination. The coordinator treats all contents as opaque
//! blobs; encrypted columns and ciphertext rows travel untouched.

use crate::error::{Error, Result};
use crate::paths::DataPaths;
use chrono::Local;
use serde::Serialize;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MOVE_ATTEMPTS: u32 = 3;
const MOVE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Per-artifact result of a restore. Artifacts fail independently; one
/// locked destination never blocks the others.
#[derive(Debug, Clone, Serialize)]
pub enum ArtifactStatus {
    Restored,
    /// Extracted path and destination are the same file; nothing to do.
    AlreadyInPlace,
    /// The archive predates this artifact; nothing extracted for it.
    NotInArchive,
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactOutcome {
    pub name: String,
    pub status: ArtifactStatus,
}

/// Outcome of [`BackupCoordinator::restore`].
///
/// `reload_required` is always set: the caller must re-open the data store
/// and re-derive any cached key material before touching the restored files,
/// instead of continuing against stale in-memory state.
#[derive(Debug, Serialize)]
#[must_use]
pub struct RestoreReport {
    pub archive: String,
    pub artifacts: Vec<ArtifactOutcome>,
    pub reload_required: bool,
}

impl RestoreReport {
    pub fn fully_restored(&self) -> bool {
        self.artifacts
            .iter()
            .all(|a| !matches!(a.status, ArtifactStatus::Failed { .. }))
    }
}

pub struct BackupCoordinator {
    backup_dir: PathBuf,
    artifacts: Vec<PathBuf>,
}

impl BackupCoordinator {
    pub fn new(paths: &DataPaths) -> Self {
        Self {
            backup_dir: paths.backup_dir(),
            artifacts: paths.backup_artifacts(),
        }
    }

    /// Coordinator over an explicit backup directory and auxiliary artifact
    /// list.
    pub fn with_artifacts(backup_dir: impl Into<PathBuf>, artifacts: Vec<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            artifacts,
        }
    }

    /// Snapshots the database plus every existing auxiliary artifact into
    /// `{db_file_name}_{timestamp}.zip` under the backup directory.
    ///
    /// The database itself is required; a missing auxiliary artifact is
    /// skipped with a warning, never an error.
    pub fn create(&self, database_path: &Path) -> Result<PathBuf> {
        fs::create_dir_all(&self.backup_dir)?;
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let db_name = file_name_of(database_path)?;
        let archive_path = self.backup_dir.join(format!("{db_name}_{timestamp}.zip"));

        let mut writer = ZipWriter::new(File::create(&archive_path)?);
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        add_entry(&mut writer, database_path, options)?;
        for artifact in &self.artifacts {
            if artifact.exists() {
                add_entry(&mut writer, artifact, options)?;
            } else {
                warn!(artifact = %artifact.display(), "artifact missing, skipping");
            }
        }
        writer.finish()?;
        info!(archive = %archive_path.display(), "backup created");
        Ok(archive_path)
    }

    /// Restores a named archive from the backup directory.
    ///
    /// The archive is extracted into a fresh staging directory, then the
    /// database and each auxiliary artifact are moved to their destinations
    /// independently. A transiently locked destination is retried
    /// [`MOVE_ATTEMPTS`] times with a fixed delay before that artifact alone
    /// is reported failed. A missing archive is [`Error::ArchiveNotFound`]
    /// and modifies nothing.
    pub fn restore(&self, archive_name: &str, database_path: &Path) -> Result<RestoreReport> {
        let archive_path = self.backup_dir.join(archive_name);
        if !archive_path.exists() {
            return Err(Error::ArchiveNotFound {
                name: archive_name.to_string(),
            });
        }

        let staging = self.backup_dir.join(format!(".restore_{}", Uuid::new_v4()));
        fs::create_dir_all(&staging)?;
        let mut archive = ZipArchive::new(File::open(&archive_path)?)?;
        archive.extract(&staging)?;

        let mut outcomes = Vec::new();
        let db_name = file_name_of(database_path)?;
        outcomes.push(ArtifactOutcome {
            name: db_name.clone(),
            status: move_artifact(&staging.join(&db_name), database_path),
        });
        for artifact in &self.artifacts {
            let name = file_name_of(artifact)?;
            outcomes.push(ArtifactOutcome {
                name: name.clone(),
                status: move_artifact(&staging.join(&name), artifact),
            });
        }

        if let Err(e) = fs::remove_dir_all(&staging) {
            warn!(staging = %staging.display(), error = %e, "could not remove staging directory");
        }
        Ok(RestoreReport {
            archive: archive_name.to_string(),
            artifacts: outcomes,
            reload_required: true,
        })
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }
}

fn add_entry(writer: &mut ZipWriter<File>, source: &Path, options: FileOptions) -> Result<()> {
    writer.start_file(file_name_of(source)?, options)?;
    let mut file = File::open(source)?;
    io::copy(&mut file, writer)?;
    Ok(())
}

/// Moves one extracted artifact into place, retrying on a locked
/// destination.
fn move_artifact(extracted: &Path, dest: &Path) -> ArtifactStatus {
    if !extracted.exists() {
        warn!(artifact = %dest.display(), "artifact not present in archive, leaving destination untouched");
        return ArtifactStatus::NotInArchive;
    }
    if same_file(extracted, dest) {
        info!(artifact = %dest.display(), "extracted path equals destination, no move needed");
        return ArtifactStatus::AlreadyInPlace;
    }

    let mut last_err = None;
    for attempt in 1..=MOVE_ATTEMPTS {
        match move_file(extracted, dest) {
            Ok(()) => {
                info!(artifact = %dest.display(), "artifact restored");
                return ArtifactStatus::Restored;
            }
            Err(e) => {
                warn!(artifact = %dest.display(), attempt, error = %e, "artifact move failed");
                last_err = Some(e);
                if attempt < MOVE_ATTEMPTS {
                    std::thread::sleep(MOVE_RETRY_DELAY);
                }
            }
        }
    }
    let source = last_err.expect("retry loop ran at least once");
    let terminal = Error::LockedResource {
        path: dest.to_path_buf(),
        attempts: MOVE_ATTEMPTS,
        source,
    };
    ArtifactStatus::Failed {
        reason: terminal.to_string(),
    }
}

fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        // Rename fails across filesystems; fall back to copy + remove.
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)?;
            Ok(())
        }
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path has no file name: {}", path.display()),
            ))
        })
}
