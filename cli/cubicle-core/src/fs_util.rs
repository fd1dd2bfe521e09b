use std::fs::File;
use std::io;
use std::path::Path;
use std::process::Command;
use std::time::SystemTime;

use rustix::fs::{Mode, OFlags};

/// Aggregate size/mtime/error information for a directory subtree, the
/// moral equivalent of `du -cs --time`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DirSummary {
    pub total_size: u64,
    /// The modification time of the most-recently-touched entry, or
    /// `UNIX_EPOCH` if the tree is empty or couldn't be read at all.
    pub last_modified: SystemTime,
    /// Set if any entry could not be stat'd (typically a permissions error);
    /// `total_size`/`last_modified` still reflect everything that *could* be
    /// read.
    pub errors: bool,
}

impl DirSummary {
    pub fn new_with_errors() -> Self {
        Self {
            total_size: 0,
            last_modified: SystemTime::UNIX_EPOCH,
            errors: true,
        }
    }
}

/// Walks `path` recursively, summing file sizes and tracking the newest
/// modification time seen. Unreadable entries are skipped and flagged via
/// [`DirSummary::errors`] rather than aborting the walk, matching `du`'s
/// tolerance of permission errors within a subtree.
pub fn summarize_dir(path: &Path) -> io::Result<DirSummary> {
    let mut summary = DirSummary {
        total_size: 0,
        last_modified: SystemTime::UNIX_EPOCH,
        errors: false,
    };

    let root_meta = std::fs::symlink_metadata(path)?;
    accumulate(&root_meta, &mut summary);

    for entry in walkdir::WalkDir::new(path).min_depth(1) {
        match entry {
            Ok(entry) => match entry.metadata() {
                Ok(meta) => accumulate(&meta, &mut summary),
                Err(_) => summary.errors = true,
            },
            Err(_) => summary.errors = true,
        }
    }

    Ok(summary)
}

fn accumulate(meta: &std::fs::Metadata, summary: &mut DirSummary) {
    summary.total_size += meta.len();
    if let Ok(modified) = meta.modified() {
        if modified > summary.last_modified {
            summary.last_modified = modified;
        }
    }
}

/// Iterates a directory's entries, yielding nothing (rather than erroring)
/// if the directory doesn't exist at all.
pub fn try_iterdir(path: &Path) -> io::Result<Vec<std::path::PathBuf>> {
    match std::fs::read_dir(path) {
        Ok(entries) => entries.map(|e| e.map(|e| e.path())).collect(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// Returns whether `path` exists, without following a dangling final
/// symlink into an error.
pub fn try_exists(path: &Path) -> io::Result<bool> {
    match std::fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Opens `path` for reading, refusing to follow a terminal symlink.
///
/// Used whenever the engine reads a path that lives inside a
/// sandbox-writable directory (a package's `provides.tar`, an environment's
/// `packages.txt`): a malicious or buggy package/update script could replace
/// that path with a symlink pointing elsewhere on the host, and `O_NOFOLLOW`
/// turns that into an `ELOOP` error instead of a silent traversal.
pub fn open_no_follow(path: &Path) -> io::Result<File> {
    let fd = rustix::fs::open(path, OFlags::RDONLY | OFlags::NOFOLLOW | OFlags::CLOEXEC, Mode::empty())
        .map_err(io::Error::from)?;
    Ok(File::from(fd))
}

/// Creates (or truncates) `path` for writing, refusing to follow a terminal
/// symlink. See [`open_no_follow`] for why this matters.
pub fn create_no_follow(path: &Path) -> io::Result<File> {
    let fd = rustix::fs::open(
        path,
        OFlags::WRONLY | OFlags::CREATE | OFlags::TRUNC | OFlags::NOFOLLOW | OFlags::CLOEXEC,
        Mode::from_raw_mode(0o644),
    )
    .map_err(io::Error::from)?;
    Ok(File::from(fd))
}

/// Copies `src` to `dst`, opening both ends with [`open_no_follow`] /
/// [`create_no_follow`].
pub fn copy_no_follow(src: &Path, dst: &Path) -> io::Result<u64> {
    let mut src_file = open_no_follow(src)?;
    let mut dst_file = create_no_follow(dst)?;
    io::copy(&mut src_file, &mut dst_file)
}

/// Recursively removes `path`, working around two host quirks documented in
/// the upstream project:
///
/// 1. Read-only subtrees (as produced by e.g. Go's module cache) can't have
///    their contents removed directly; a single `chmod -R u+rwX` on the
///    parent, then retry, fixes this.
/// 2. A sandbox runner may leave behind empty directories it owns under a
///    foreign uid where a volume was mounted. These are still removable
///    after the chmod pass even though their permission bits can't be
///    altered by a plain `chmod` on the entry itself.
pub fn rmtree(path: &Path) -> io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            let parent = path.parent().unwrap_or(path);
            let status = Command::new("chmod")
                .arg("-R")
                .arg("u+rwX")
                .arg(parent)
                .status()?;
            if !status.success() {
                return Err(io::Error::other(format!(
                    "chmod -R u+rwX {parent:?} exited with {status}"
                )));
            }
            std::fs::remove_dir_all(path)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_iterdir_on_missing_dir_is_empty() {
        let entries = try_iterdir(Path::new("/does/not/exist")).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn summarize_dir_counts_files_and_tracks_mtime() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), b"world!").unwrap();

        let summary = summarize_dir(dir.path()).unwrap();
        assert!(summary.total_size >= 11);
        assert!(!summary.errors);
        assert!(summary.last_modified > SystemTime::UNIX_EPOCH);
    }

    #[test]
    fn open_no_follow_refuses_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("real.txt");
        std::fs::write(&target, b"secret").unwrap();
        let link = dir.path().join("link.txt");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let err = open_no_follow(&link).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::FilesystemLoop);
    }

    #[test]
    fn copy_no_follow_round_trips_plain_files() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        let dst = dir.path().join("dst.txt");
        std::fs::write(&src, b"payload").unwrap();

        copy_no_follow(&src, &dst).unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"payload");
    }
}
