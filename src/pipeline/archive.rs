//! Source payload extraction.
//!
//! A payload is unpacked into a staging directory next to its destination and
//! renamed into place only once complete, so a source directory is either
//! absent or fully materialized. Payloads that are not gzip+tar are kept as a
//! single raw file named [`RAW_SOURCE_NAME`].

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tempfile::TempDir;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Largest archive entry that will be written (100 MiB).
pub const MAX_ENTRY_BYTES: u64 = 100 * 1024 * 1024;

/// File name used when the payload is a bare source file.
pub const RAW_SOURCE_NAME: &str = "main.tex";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Errors that abort extraction. Hostile or malformed entries never do.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("extraction into {0} cancelled")]
    Cancelled(PathBuf),

    /// The blocking extraction task panicked or was aborted.
    #[error("extraction task failed: {0}")]
    Task(String),
}

impl ArchiveError {
    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// How a payload was materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceForm {
    /// Unpacked from gzip+tar; `skipped` counts rejected entries.
    Archive { files: usize, skipped: usize },
    /// Stored as a single [`RAW_SOURCE_NAME`].
    RawFile,
}

/// Extracts `payload` into `dest` on the blocking pool.
///
/// If `dest` already exists when the staged tree is revealed, another writer
/// finished first and its tree is kept.
///
/// # Errors
///
/// Returns [`ArchiveError::Io`] for local filesystem failures and
/// [`ArchiveError::Cancelled`] if `cancel` fires between entries.
pub async fn extract_source(
    payload: PathBuf,
    dest: PathBuf,
    cancel: CancellationToken,
) -> Result<SourceForm, ArchiveError> {
    tokio::task::spawn_blocking(move || extract_source_blocking(&payload, &dest, &cancel))
        .await
        .map_err(|e| ArchiveError::Task(e.to_string()))?
}

/// Synchronous body of [`extract_source`].
///
/// # Errors
///
/// See [`extract_source`].
#[instrument(skip(cancel), fields(payload = %payload.display(), dest = %dest.display()))]
pub fn extract_source_blocking(
    payload: &Path,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<SourceForm, ArchiveError> {
    extract_with_limit(payload, dest, cancel, MAX_ENTRY_BYTES)
}

fn extract_with_limit(
    payload: &Path,
    dest: &Path,
    cancel: &CancellationToken,
    max_entry_bytes: u64,
) -> Result<SourceForm, ArchiveError> {
    let parent = dest.parent().ok_or_else(|| {
        ArchiveError::io(
            dest,
            io::Error::new(io::ErrorKind::InvalidInput, "destination has no parent"),
        )
    })?;
    fs::create_dir_all(parent).map_err(|e| ArchiveError::io(parent, e))?;

    let (staging, form) = if is_gzip(payload)? {
        let staging = new_staging(parent)?;
        match unpack_tar_gz(payload, staging.path(), cancel, max_entry_bytes)? {
            Some(form) => (staging, form),
            None => {
                drop(staging);
                let staging = new_staging(parent)?;
                write_raw(payload, staging.path(), true)?;
                (staging, SourceForm::RawFile)
            }
        }
    } else {
        let staging = new_staging(parent)?;
        write_raw(payload, staging.path(), false)?;
        (staging, SourceForm::RawFile)
    };

    if cancel.is_cancelled() {
        return Err(ArchiveError::Cancelled(dest.to_path_buf()));
    }

    // The emptied TempDir ignores its failed cleanup on drop.
    if let Err(e) = fs::rename(staging.path(), dest) {
        if dest.is_dir() {
            debug!("source directory appeared concurrently, keeping existing tree");
        } else {
            return Err(ArchiveError::io(dest, e));
        }
    }

    debug!(?form, "source materialized");
    Ok(form)
}

fn new_staging(parent: &Path) -> Result<TempDir, ArchiveError> {
    tempfile::Builder::new()
        .prefix(".extract-")
        .tempdir_in(parent)
        .map_err(|e| ArchiveError::io(parent, e))
}

fn is_gzip(payload: &Path) -> Result<bool, ArchiveError> {
    let mut file = File::open(payload).map_err(|e| ArchiveError::io(payload, e))?;
    let mut magic = [0u8; 2];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == GZIP_MAGIC),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(ArchiveError::io(payload, e)),
    }
}

/// Unpacks a gzip+tar payload. `Ok(None)` means the stream is not a usable
/// tar archive and the caller should fall back to a raw file.
fn unpack_tar_gz(
    payload: &Path,
    staging: &Path,
    cancel: &CancellationToken,
    max_entry_bytes: u64,
) -> Result<Option<SourceForm>, ArchiveError> {
    let file = File::open(payload).map_err(|e| ArchiveError::io(payload, e))?;
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));

    let entries = match archive.entries() {
        Ok(entries) => entries,
        Err(e) => {
            debug!(error = %e, "payload is not a tar stream");
            return Ok(None);
        }
    };

    let mut files = 0usize;
    let mut skipped = 0usize;
    let mut dirs = 0usize;
    for entry in entries {
        if cancel.is_cancelled() {
            return Err(ArchiveError::Cancelled(staging.to_path_buf()));
        }
        let mut entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, files, "malformed tar stream");
                return Ok(None);
            }
        };

        let Some(relative) = entry.path().ok().and_then(|p| clean_entry_path(&p)) else {
            warn!(
                entry = %String::from_utf8_lossy(&entry.path_bytes()),
                "skipping archive entry escaping the destination"
            );
            skipped += 1;
            continue;
        };
        let target = staging.join(&relative);
        let entry_type = entry.header().entry_type();

        if entry_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| ArchiveError::io(&target, e))?;
            dirs += 1;
            continue;
        }
        if !entry_type.is_file() {
            debug!(path = %relative.display(), ?entry_type, "skipping non-regular entry");
            skipped += 1;
            continue;
        }

        // Entry::size honours a PAX `size` record; the raw header field may not.
        let size = entry.size();
        if size > max_entry_bytes {
            warn!(path = %relative.display(), size, "skipping oversized archive entry");
            skipped += 1;
            continue;
        }

        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir).map_err(|e| ArchiveError::io(dir, e))?;
        }
        match copy_entry(&mut (&mut entry).take(max_entry_bytes + 1), &target)? {
            CopyOutcome::Written(written) if written > max_entry_bytes => {
                warn!(path = %relative.display(), written, "archive entry exceeded its size, removed");
                fs::remove_file(&target).map_err(|e| ArchiveError::io(&target, e))?;
                skipped += 1;
            }
            CopyOutcome::Written(_) => files += 1,
            CopyOutcome::ReadFailed(e) => {
                debug!(error = %e, path = %relative.display(), "truncated tar stream");
                return Ok(None);
            }
        }
    }

    if files == 0 && skipped == 0 && dirs == 0 {
        return Ok(None);
    }
    Ok(Some(SourceForm::Archive { files, skipped }))
}

enum CopyOutcome {
    Written(u64),
    ReadFailed(io::Error),
}

/// Copies one entry, separating archive read failures from local write failures.
fn copy_entry(reader: &mut impl Read, target: &Path) -> Result<CopyOutcome, ArchiveError> {
    let mut out = File::create(target).map_err(|e| ArchiveError::io(target, e))?;
    let mut buf = vec![0u8; 64 * 1024];
    let mut written = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Ok(CopyOutcome::ReadFailed(e)),
        };
        out.write_all(&buf[..n])
            .map_err(|e| ArchiveError::io(target, e))?;
        written += n as u64;
    }
    out.flush().map_err(|e| ArchiveError::io(target, e))?;
    Ok(CopyOutcome::Written(written))
}

/// Writes the payload as a single source file, gunzipping it when possible.
fn write_raw(payload: &Path, staging: &Path, gzipped: bool) -> Result<(), ArchiveError> {
    let target = staging.join(RAW_SOURCE_NAME);
    if gzipped {
        let file = File::open(payload).map_err(|e| ArchiveError::io(payload, e))?;
        let mut decoder = GzDecoder::new(BufReader::new(file)).take(MAX_ENTRY_BYTES);
        match copy_entry(&mut decoder, &target)? {
            CopyOutcome::Written(_) => return Ok(()),
            CopyOutcome::ReadFailed(e) => {
                debug!(error = %e, "payload is not valid gzip, storing it verbatim");
            }
        }
    }
    fs::copy(payload, &target).map_err(|e| ArchiveError::io(&target, e))?;
    Ok(())
}

/// Lexically cleans an entry path. Returns `None` if it escapes upward or is empty.
///
/// Root and prefix components are dropped so absolute names land inside the
/// destination.
fn clean_entry_path(path: &Path) -> Option<PathBuf> {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => cleaned.push(part),
            Component::ParentDir => {
                if !cleaned.pop() {
                    return None;
                }
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    (!cleaned.as_os_str().is_empty()).then_some(cleaned)
}
