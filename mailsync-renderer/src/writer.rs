//! Backup-then-atomic writer for rendered config files.
//!
//! 1. Normalise line endings and ensure a trailing newline.
//! 2. Compare with the file on disk, ignoring surrounding whitespace.
//! 3. Write `<file>.mailsync.tmp`.
//! 4. Move the existing file to the first free `<file>.mailsync_bak[.N]`.
//! 5. Rename the tmp file to the target.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{io_err, RenderError};

const BACKUP_SUFFIX: &str = "mailsync_bak";

// ---------------------------------------------------------------------------
// Write result
// ---------------------------------------------------------------------------

/// Outcome of an individual file write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// File was written; `backup` holds the previous content when there was any.
    Written {
        path: PathBuf,
        backup: Option<PathBuf>,
    },
    /// On-disk content already matches.
    Unchanged { path: PathBuf },
    /// Dry run: the file would have been written.
    WouldWrite { path: PathBuf },
}

impl WriteResult {
    pub fn path(&self) -> &Path {
        match self {
            WriteResult::Written { path, .. }
            | WriteResult::Unchanged { path }
            | WriteResult::WouldWrite { path } => path,
        }
    }

    pub fn changed(&self) -> bool {
        !matches!(self, WriteResult::Unchanged { .. })
    }
}

// ---------------------------------------------------------------------------
// write_config
// ---------------------------------------------------------------------------

pub fn write_config(path: &Path, content: &str, dry_run: bool) -> Result<WriteResult, RenderError> {
    let tmp = PathBuf::from(format!("{}.mailsync.tmp", path.display()));
    write_config_with_tmp(path, content, dry_run, &tmp)
}

fn write_config_with_tmp(
    path: &Path,
    content: &str,
    dry_run: bool,
    tmp: &Path,
) -> Result<WriteResult, RenderError> {
    let content = normalize(content);

    if let Some(existing) = read_existing(path)? {
        if existing.trim() == content.trim() {
            tracing::debug!("unchanged: {}", path.display());
            return Ok(WriteResult::Unchanged {
                path: path.to_path_buf(),
            });
        }
    }

    if dry_run {
        tracing::info!("[dry-run] would write: {}", path.display());
        return Ok(WriteResult::WouldWrite {
            path: path.to_path_buf(),
        });
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }

    std::fs::write(tmp, &content).map_err(|e| io_err(tmp, e))?;

    let backup = if path.exists() {
        let backup = free_backup_path(path);
        if let Err(e) = std::fs::rename(path, &backup) {
            let _ = std::fs::remove_file(tmp);
            return Err(io_err(path, e));
        }
        tracing::info!("backed up {} to {}", path.display(), backup.display());
        Some(backup)
    } else {
        None
    };

    if let Err(e) = std::fs::rename(tmp, path) {
        let _ = std::fs::remove_file(tmp);
        return Err(io_err(path, e));
    }

    tracing::info!("wrote: {}", path.display());
    Ok(WriteResult::Written {
        path: path.to_path_buf(),
        backup,
    })
}

/// `<file>.mailsync_bak`, then `<file>.mailsync_bak.1`, `.2`, ...
pub fn free_backup_path(path: &Path) -> PathBuf {
    let base = format!("{}.{BACKUP_SUFFIX}", path.display());
    let first = PathBuf::from(&base);
    if !first.exists() {
        return first;
    }
    (1u32..)
        .map(|n| PathBuf::from(format!("{base}.{n}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

pub(crate) fn read_existing(path: &Path) -> Result<Option<String>, RenderError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content.replace("\r\n", "\n"))),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_err(path, err)),
    }
}

pub(crate) fn normalize(content: &str) -> String {
    let mut normalized = content.replace("\r\n", "\n");
    if !normalized.ends_with('\n') {
        normalized.push('\n');
    }
    normalized
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
