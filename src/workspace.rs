//! Local staging directory for a fetched bundle.
//!
//! A [`Workspace`] is wiped and re-created before every extraction, so a
//! bundle never merges with content left over from an earlier run. Callers
//! that run invocations concurrently must give each one its own directory;
//! see [`Workspace::for_run`].

use std::fs::{self, File};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::ZipArchive;
use zip::result::ZipError;

use crate::archive::FetchedArchive;
use crate::core::error::TaskError;
use crate::core::types::RunId;

const ARCHIVE_SUFFIX: &str = ".zip";

/// Lifecycle of a workspace directory within one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceState {
    /// Not yet prepared by this invocation.
    Absent,
    /// Being wiped, or left dirty by a failed extraction.
    Cleaning,
    /// Freshly prepared and empty.
    Empty,
    /// Holds a fully extracted bundle.
    Populated,
}

/// A directory that stages one extracted bundle.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    state: WorkspaceState,
    extracted_root: Option<PathBuf>,
}

impl Workspace {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: WorkspaceState::Absent,
            extracted_root: None,
        }
    }

    /// A workspace namespaced under `base` by run id.
    pub fn for_run(base: impl AsRef<Path>, run_id: &RunId) -> Self {
        Self::new(base.as_ref().join(run_id.to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> WorkspaceState {
        self.state
    }

    /// Root folder of the extracted bundle, once populated.
    pub fn extracted_root(&self) -> Option<&Path> {
        self.extracted_root.as_deref()
    }

    /// Wipe the directory and re-create it empty.
    pub async fn prepare(&mut self) -> Result<(), TaskError> {
        self.state = WorkspaceState::Cleaning;
        self.extracted_root = None;
        prepare(&self.path).await?;
        self.state = WorkspaceState::Empty;
        Ok(())
    }

    /// Extract `archive` into the freshly prepared directory.
    ///
    /// Refuses to run unless [`prepare`](Self::prepare) has just succeeded.
    /// On failure the workspace stays in [`WorkspaceState::Cleaning`].
    pub async fn extract(&mut self, archive: FetchedArchive) -> Result<PathBuf, TaskError> {
        if self.state != WorkspaceState::Empty {
            return Err(TaskError::workspace(
                &self.path,
                io::Error::other(format!(
                    "workspace is {:?}; it must be prepared before extraction",
                    self.state
                )),
            ));
        }

        self.state = WorkspaceState::Cleaning;
        let root = extract(archive, &self.path).await?;
        self.state = WorkspaceState::Populated;
        self.extracted_root = Some(root.clone());
        Ok(root)
    }
}

/// Remove `dir` if it exists, then create it empty.
pub async fn prepare(dir: &Path) -> Result<(), TaskError> {
    match tokio::fs::symlink_metadata(dir).await {
        Ok(meta) if meta.is_dir() => {
            debug!(path = %dir.display(), "removing stale workspace");
            tokio::fs::remove_dir_all(dir)
                .await
                .map_err(|e| TaskError::workspace(dir, e))?;
        }
        Ok(_) => {
            tokio::fs::remove_file(dir)
                .await
                .map_err(|e| TaskError::workspace(dir, e))?;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(TaskError::workspace(dir, e)),
    }

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| TaskError::workspace(dir, e))?;
    info!(path = %dir.display(), "workspace prepared");
    Ok(())
}

/// Decompress `archive` into `target` and return the bundle's root folder.
///
/// The root is `target` joined with the archive filename minus its `.zip`
/// suffix. Decompression runs on the blocking pool.
pub async fn extract(archive: FetchedArchive, target: &Path) -> Result<PathBuf, TaskError> {
    let (bytes, filename) = archive.into_parts();
    let root = target.join(root_folder_name(&filename));

    let unpack_target = target.to_path_buf();
    let entries = tokio::task::spawn_blocking(move || unpack(&bytes, &filename, &unpack_target))
        .await
        .map_err(|e| TaskError::workspace(target, io::Error::other(e)))??;

    if !root.is_dir() {
        warn!(root = %root.display(), "archive has no top-level folder matching its filename");
    }
    info!(root = %root.display(), entries, "archive extracted");
    Ok(root)
}

/// Folder name a GitHub zipball unpacks to: the filename without `.zip`.
pub fn root_folder_name(filename: &str) -> &str {
    filename.strip_suffix(ARCHIVE_SUFFIX).unwrap_or(filename)
}

fn unpack(bytes: &[u8], filename: &str, target: &Path) -> Result<usize, TaskError> {
    let invalid = |message: String| TaskError::ArchiveFormat {
        filename: filename.to_string(),
        message,
    };
    let zip_error = |e: ZipError| invalid(e.to_string());

    let mut zip = ZipArchive::new(Cursor::new(bytes)).map_err(zip_error)?;
    let count = zip.len();

    for index in 0..count {
        let mut entry = zip.by_index(index).map_err(zip_error)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(invalid(format!(
                "entry '{}' escapes the extraction directory",
                entry.name()
            )));
        };
        let out = target.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out).map_err(|e| TaskError::workspace(&out, e))?;
            continue;
        }

        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent).map_err(|e| TaskError::workspace(parent, e))?;
        }
        let mut file = File::create(&out).map_err(|e| TaskError::workspace(&out, e))?;

        // Read errors mean corrupt data; write errors are the filesystem's.
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = entry
                .read(&mut buf)
                .map_err(|e| invalid(format!("entry '{}': {}", entry.name(), e)))?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n])
                .map_err(|e| TaskError::workspace(&out, e))?;
        }

        apply_mode(&out, entry.unix_mode())?;
    }

    Ok(count)
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: Option<u32>) -> Result<(), TaskError> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
            .map_err(|e| TaskError::workspace(path, e))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: Option<u32>) -> Result<(), TaskError> {
    Ok(())
}
