use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "rosterlock";
pub const APP_NAME: &str = "rosterlock";

pub const PUBLIC_KEY_FILE: &str = "public_key.pem";
pub const PRIVATE_KEY_FILE: &str = "private_key.pem";
pub const DATABASE_FILE: &str = "members.db";
pub const AUDIT_LOG_FILE: &str = "logs.csv";
pub const LOG_EXPORT_FILE: &str = "logs_export.csv";
pub const PROCESS_LOG_FILE: &str = "system.log";
pub const BACKUP_DIR: &str = "backups";

/// Resolves the data directory and names every shared artifact in it.
///
/// Components never hardcode file locations; they receive a `DataPaths` at
/// construction time, which lets tests point the whole stack at a temp dir.
#[derive(Debug, Clone)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    /// Platform data directory, overridable with `ROSTERLOCK_DATA_DIR`.
    pub fn resolve() -> crate::Result<Self> {
        if let Ok(override_dir) = std::env::var("ROSTERLOCK_DATA_DIR") {
            return Ok(Self {
                root: PathBuf::from(override_dir),
            });
        }
        let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "cannot determine data directory",
            )
        })?;
        Ok(Self {
            root: dirs.data_dir().to_path_buf(),
        })
    }

    /// Anchors all artifacts under an explicit root.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn ensure_root(&self) -> crate::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn public_key(&self) -> PathBuf {
        self.root.join(PUBLIC_KEY_FILE)
    }

    pub fn private_key(&self) -> PathBuf {
        self.root.join(PRIVATE_KEY_FILE)
    }

    pub fn database(&self) -> PathBuf {
        self.root.join(DATABASE_FILE)
    }

    pub fn audit_log(&self) -> PathBuf {
        self.root.join(AUDIT_LOG_FILE)
    }

    pub fn log_export(&self) -> PathBuf {
        self.root.join(LOG_EXPORT_FILE)
    }

    pub fn process_log(&self) -> PathBuf {
        self.root.join(PROCESS_LOG_FILE)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.root.join(BACKUP_DIR)
    }

    /// Auxiliary artifacts carried by every backup alongside the database.
    pub fn backup_artifacts(&self) -> Vec<PathBuf> {
        vec![self.audit_log(), self.log_export(), self.process_log()]
    }
}
