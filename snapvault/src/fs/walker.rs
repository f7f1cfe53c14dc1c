//! Directory traversal for hardlink copies.
//!
//! `hardlink_tree` recreates a directory tree with every non-directory entry
//! hardlinked to the original, the way the mv-record and temporary snapshot
//! copies are built on local storage.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Counts of what a hardlink copy created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub dirs: usize,
    pub files: usize,
    pub symlinks: usize,
}

/// Copy the tree at `src` to `dest`, hardlinking files.
///
/// Directories are created with the permissions of their source once their
/// contents are in place (so read-only directories can still be filled).
/// Symlinks are recreated, not followed. `dest` must not exist yet.
///
/// # Errors
/// Any I/O error aborts the copy; a partial `dest` is left for the caller to
/// remove.
pub fn hardlink_tree(src: &Path, dest: &Path) -> io::Result<TreeStats> {
    let mut stats = TreeStats::default();
    let mut dir_permissions: Vec<(PathBuf, fs::Permissions)> = Vec::new();

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dest.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            if entry.depth() == 0 {
                fs::create_dir_all(&target)?;
            } else {
                fs::create_dir(&target)?;
            }
            dir_permissions.push((target, entry.metadata()?.permissions()));
            stats.dirs += 1;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            make_symlink(&link, &target)?;
            stats.symlinks += 1;
        } else {
            fs::hard_link(entry.path(), &target)?;
            stats.files += 1;
        }
    }

    // Deepest first, so restricting a parent never blocks a child.
    for (dir, permissions) in dir_permissions.into_iter().rev() {
        fs::set_permissions(&dir, permissions)?;
    }

    Ok(stats)
}

#[cfg(unix)]
fn make_symlink(link: &Path, at: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(link, at)
}

#[cfg(not(unix))]
fn make_symlink(_link: &Path, at: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("cannot recreate symlink {}", at.display()),
    ))
}
