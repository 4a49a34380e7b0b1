use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use agent_acceptance_core::{now_local, AcceptanceError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::rebase::Rebaser;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchivedFile {
    /// Path relative to the archive folder, `/`-separated.
    pub path: String,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchiveManifest {
    pub archived_at: String,
    pub missing: Vec<String>,
    pub files: Vec<ArchivedFile>,
}

/// Empty every existing directory in `paths`, keeping the directories.
///
/// Entries that cannot be removed are logged and left behind. Returns how many
/// of the paths existed.
///
/// # Errors
/// Returns an environment error when none of the paths exist.
pub fn clean_paths(paths: &[PathBuf]) -> Result<usize> {
    let mut existing = 0_usize;

    for path in paths {
        if !path.exists() {
            debug!(path = %path.display(), "clean path absent, skipping");
            continue;
        }
        existing += 1;
        info!(path = %path.display(), "deleting old logs or cache");

        if !path.is_dir() {
            warn!(path = %path.display(), "clean path is not a directory, leaving it");
            continue;
        }
        match fs::read_dir(path) {
            Ok(entries) => {
                for entry in entries {
                    match entry {
                        Ok(entry) => remove_entry(&entry.path()),
                        Err(err) => warn!(path = %path.display(), error = %err, "unreadable directory entry"),
                    }
                }
            }
            Err(err) => warn!(path = %path.display(), error = %err, "failed to list directory"),
        }
        if !path.exists() {
            if let Err(err) = fs::create_dir_all(path) {
                warn!(path = %path.display(), error = %err, "failed to recreate cleaned directory");
            }
        }
    }

    if existing == 0 {
        return Err(AcceptanceError::Environment(
            "none of the folders to clean exist; check the configured paths".into(),
        ));
    }
    Ok(existing)
}

fn remove_entry(path: &Path) {
    let removed = if path.is_dir() { fs::remove_dir_all(path) } else { fs::remove_file(path) };
    if let Err(err) = removed {
        warn!(path = %path.display(), error = %err, "failed to delete entry");
    }
}

/// Copy each existing source into its positionally paired destination folder.
///
/// A directory source has its contents copied into the destination; a file
/// source is copied into it. Modification times are preserved. With a
/// rebaser, every log-like file copied by this call is rebased once.
/// Returns the copied files.
///
/// # Errors
/// Returns a configuration error when the lists differ in length, an
/// environment error when no source exists, and I/O or parse errors from
/// copying and rebasing.
pub fn stage_paths(
    sources: &[PathBuf],
    destinations: &[PathBuf],
    rebaser: Option<&Rebaser>,
) -> Result<Vec<PathBuf>> {
    if sources.len() != destinations.len() {
        return Err(AcceptanceError::Config(format!(
            "{} copy sources but {} destinations",
            sources.len(),
            destinations.len()
        )));
    }

    let mut existing = 0_usize;
    let mut copied = Vec::new();
    for (source, destination) in sources.iter().zip(destinations) {
        if !source.exists() {
            debug!(source = %source.display(), "fixture source absent, skipping");
            continue;
        }
        existing += 1;
        info!(source = %source.display(), destination = %destination.display(), "copying fixture");
        copied.extend(copy_into(source, destination)?);
    }

    if existing == 0 {
        return Err(AcceptanceError::Environment(
            "no source folders or files in the test case folder".into(),
        ));
    }

    if let Some(rebaser) = rebaser {
        let mut rebased = 0_usize;
        for file in &copied {
            if rebaser.rebase_in_place(file)? {
                rebased += 1;
            }
        }
        info!(rebased, now = %rebaser.now(), "finished updating dates in log files");
    }

    Ok(copied)
}

/// Copy `source` into the folder `destination`, creating it when needed.
fn copy_into(source: &Path, destination: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(destination).map_err(|err| AcceptanceError::io(destination, err))?;

    if !source.is_dir() {
        let name = source.file_name().ok_or_else(|| {
            AcceptanceError::Environment(format!("{} has no file name", source.display()))
        })?;
        let target = destination.join(name);
        copy_file(source, &target)?;
        return Ok(vec![target]);
    }

    let mut copied = Vec::new();
    for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(source).to_path_buf();
            AcceptanceError::io(&path, io::Error::from(err))
        })?;
        let relative = entry.path().strip_prefix(source).map_err(|_| {
            AcceptanceError::Environment(format!(
                "{} escaped {}",
                entry.path().display(),
                source.display()
            ))
        })?;
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|err| AcceptanceError::io(&target, err))?;
        } else {
            copy_file(entry.path(), &target)?;
            copied.push(target);
        }
    }
    Ok(copied)
}

fn copy_file(source: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|err| AcceptanceError::io(parent, err))?;
    }
    fs::copy(source, target).map_err(|err| AcceptanceError::io(source, err))?;

    let modified = fs::metadata(source)
        .and_then(|meta| meta.modified())
        .map_err(|err| AcceptanceError::io(source, err))?;
    File::options()
        .write(true)
        .open(target)
        .and_then(|file| file.set_modified(modified))
        .map_err(|err| AcceptanceError::io(target, err))
}

/// Best-effort copy of `paths` into `destination`, followed by a manifest of
/// everything in the folder.
///
/// Missing paths are skipped; a missing database file is logged as an error.
/// Copy failures are logged and do not stop the archive.
///
/// # Errors
/// Returns an I/O error when the archive folder or its manifest cannot be written.
pub fn archive(destination: &Path, paths: &[PathBuf]) -> Result<ArchiveManifest> {
    fs::create_dir_all(destination).map_err(|err| AcceptanceError::io(destination, err))?;

    let mut missing = Vec::new();
    for path in paths {
        if path.exists() {
            info!(path = %path.display(), "archiving");
            if let Err(err) = copy_into(path, destination) {
                warn!(path = %path.display(), error = %err, "failed to archive path");
            }
            continue;
        }
        let is_database = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.to_ascii_lowercase().contains("sqlite"));
        if is_database {
            error!(path = %path.display(), "database path does not exist");
        } else {
            debug!(path = %path.display(), "archive path absent, skipping");
        }
        missing.push(path.display().to_string());
    }

    let manifest = ArchiveManifest {
        archived_at: now_local()
            .format(&Rfc3339)
            .map_err(|err| AcceptanceError::Parse(format!("cannot format archive time: {err}")))?,
        missing,
        files: digest_folder(destination)?,
    };
    let manifest_path = destination.join(MANIFEST_FILE);
    let json = serde_json::to_vec_pretty(&manifest)
        .map_err(|err| AcceptanceError::Parse(format!("cannot serialize archive manifest: {err}")))?;
    fs::write(&manifest_path, json).map_err(|err| AcceptanceError::io(&manifest_path, err))?;

    info!(destination = %destination.display(), files = manifest.files.len(), "done archiving");
    Ok(manifest)
}

fn digest_folder(root: &Path) -> Result<Vec<ArchivedFile>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(root).to_path_buf();
            AcceptanceError::io(&path, io::Error::from(err))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = relative_name(root, entry.path());
        if relative == MANIFEST_FILE {
            continue;
        }
        let (sha256, bytes) = digest_file(entry.path())?;
        files.push(ArchivedFile { path: relative, bytes, sha256 });
    }
    Ok(files)
}

fn relative_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|part| part.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn digest_file(path: &Path) -> Result<(String, u64)> {
    let mut file = File::open(path).map_err(|err| AcceptanceError::io(path, err))?;
    let mut hasher = Sha256::new();
    let bytes = io::copy(&mut file, &mut hasher).map_err(|err| AcceptanceError::io(path, err))?;
    Ok((format!("{:x}", hasher.finalize()), bytes))
}

/// Re-hash an archive folder against its manifest. Returns the relative paths
/// that are missing or whose size or digest changed.
///
/// # Errors
/// Returns an I/O or parse error when the manifest cannot be read.
pub fn verify_archive(destination: &Path) -> Result<Vec<String>> {
    let manifest_path = destination.join(MANIFEST_FILE);
    let bytes = fs::read(&manifest_path).map_err(|err| AcceptanceError::io(&manifest_path, err))?;
    let manifest: ArchiveManifest = serde_json::from_slice(&bytes).map_err(|err| {
        AcceptanceError::Parse(format!("invalid manifest {}: {err}", manifest_path.display()))
    })?;

    let mut changed = Vec::new();
    for expected in &manifest.files {
        let path = destination.join(&expected.path);
        match digest_file(&path) {
            Ok((sha256, bytes)) if sha256 == expected.sha256 && bytes == expected.bytes => {}
            Ok(_) | Err(_) => changed.push(expected.path.clone()),
        }
    }
    Ok(changed)
}
