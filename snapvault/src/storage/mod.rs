//! Storage mutations: the filesystem side effects the orchestrator applies.
//!
//! Local locations are handled with native filesystem calls; remote
//! (`host:path`) locations are handled with shell commands over ssh.

pub mod location;
pub mod shell;

pub use location::Location;
pub use shell::{LineAction, Shell};

use crate::fs::walker::hardlink_tree;
use crate::snapshot::{Catalog, SortOrder};
use crate::utils::errors::{Result, SnapError};
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, info};

/// Access needed on a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Result of probing a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirStatus {
    Missing,
    Denied,
    Ok,
}

/// Filesystem operations on storage locations.
#[allow(async_fn_in_trait)]
pub trait StorageMutator {
    /// Whether `loc` is a directory granting `access`.
    async fn dir_status(&self, loc: &Location, access: Access) -> Result<DirStatus>;

    /// Names of the immediate subdirectories of `loc` (symlinks excluded).
    async fn list_names(&self, loc: &Location) -> Result<Vec<String>>;

    /// Recursively delete `loc`. Deleting something already gone succeeds.
    async fn remove(&self, loc: &Location) -> Result<()>;

    /// Rename `src` to `dest` on the same host.
    async fn rename(&self, src: &Location, dest: &Location) -> Result<()>;

    /// Make `dest` a copy of the tree at `src` whose files are hardlinks to the
    /// files in `src`. An existing `dest` is replaced.
    async fn hardlink_copy(&self, src: &Location, dest: &Location) -> Result<()>;

    /// Fresh snapshot catalog of `loc`.
    ///
    /// # Errors
    /// `NotFound` / `NotReadable` as for [`Catalog::list`].
    async fn catalog(&self, loc: &Location, order: SortOrder) -> Result<Catalog> {
        catalog_from_listing(self, loc, order).await
    }
}

/// Catalog built from `dir_status` and `list_names`.
pub async fn catalog_from_listing<S>(storage: &S, loc: &Location, order: SortOrder) -> Result<Catalog>
where
    S: StorageMutator + ?Sized,
{
    match storage.dir_status(loc, Access::Read).await? {
        DirStatus::Missing => Err(SnapError::NotFound(loc.path().to_path_buf())),
        DirStatus::Denied => Err(SnapError::NotReadable {
            path: loc.path().to_path_buf(),
            source: ErrorKind::PermissionDenied.into(),
        }),
        DirStatus::Ok => {
            let names = storage.list_names(loc).await?;
            Ok(Catalog::from_names(loc.path(), names, order))
        }
    }
}

/// Storage backed by the local filesystem and ssh.
#[derive(Debug, Clone, Default)]
pub struct ShellStorage {
    shell: Shell,
}

impl ShellStorage {
    pub fn new(shell: Shell) -> Self {
        Self { shell }
    }

    pub fn shell(&self) -> &Shell {
        &self.shell
    }
}

impl StorageMutator for ShellStorage {
    async fn dir_status(&self, loc: &Location, access: Access) -> Result<DirStatus> {
        match loc.host() {
            None => {
                let path = loc.path().to_path_buf();
                Ok(tokio::task::spawn_blocking(move || local_dir_status(&path, access))
                    .await
                    .map_err(|e| SnapError::Sync(format!("status task failed: {e}")))?)
            }
            Some(host) => {
                let flag = match access {
                    Access::Read => "-r",
                    Access::Write => "-w",
                };
                let path = loc.path().to_string_lossy();
                let script = format!(
                    "if [ -d \"$1\" ]; then if [ {flag} \"$1\" ]; then echo ok; else echo denied; fi; else echo missing; fi"
                );
                let output = self
                    .shell
                    .run(Some(host), "sh", &["-c", script.as_str(), "sh", &*path])
                    .await?;
                match output.last().map(String::as_str) {
                    Some("ok") => Ok(DirStatus::Ok),
                    Some("denied") => Ok(DirStatus::Denied),
                    Some("missing") => Ok(DirStatus::Missing),
                    other => Err(SnapError::Sync(format!(
                        "unexpected directory check output from {host}: {other:?}"
                    ))),
                }
            }
        }
    }

    async fn list_names(&self, loc: &Location) -> Result<Vec<String>> {
        match loc.host() {
            None => {
                let path = loc.path().to_path_buf();
                tokio::task::spawn_blocking(move || local_list_names(&path))
                    .await
                    .map_err(|e| SnapError::Sync(format!("listing task failed: {e}")))?
            }
            Some(host) => {
                let path = loc.path().to_string_lossy();
                self.shell
                    .run(
                        Some(host),
                        "find",
                        &[&*path, "-mindepth", "1", "-maxdepth", "1", "-type", "d", "-printf", "%f\\n"],
                    )
                    .await
            }
        }
    }

    async fn remove(&self, loc: &Location) -> Result<()> {
        info!(path = %loc, "Removing");
        match loc.host() {
            None => match tokio::fs::remove_dir_all(loc.path()).await {
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                other => Ok(other?),
            },
            Some(host) => {
                let path = loc.path().to_string_lossy();
                self.shell.run(Some(host), "rm", &["-rf", &*path]).await?;
                Ok(())
            }
        }
    }

    async fn rename(&self, src: &Location, dest: &Location) -> Result<()> {
        require_same_host(src, dest)?;
        debug!(from = %src, to = %dest, "Renaming");
        match src.host() {
            None => Ok(tokio::fs::rename(src.path(), dest.path()).await?),
            Some(host) => {
                let from = src.path().to_string_lossy();
                let to = dest.path().to_string_lossy();
                self.shell.run(Some(host), "mv", &[&*from, &*to]).await?;
                Ok(())
            }
        }
    }

    async fn hardlink_copy(&self, src: &Location, dest: &Location) -> Result<()> {
        require_same_host(src, dest)?;
        debug!(from = %src, to = %dest, "Hardlink copy");
        match src.host() {
            None => {
                self.remove(dest).await?;
                let (from, to) = (src.path().to_path_buf(), dest.path().to_path_buf());
                let stats = tokio::task::spawn_blocking(move || hardlink_tree(&from, &to))
                    .await
                    .map_err(|e| SnapError::Sync(format!("hardlink task failed: {e}")))??;
                debug!(
                    dirs = stats.dirs,
                    files = stats.files,
                    symlinks = stats.symlinks,
                    "Hardlink copy complete"
                );
                Ok(())
            }
            Some(host) => {
                // rsync keeps symlinks and special files intact, unlike `cp -al`
                let from = Location::local(src.path()).rsync_arg(true);
                let to = Location::local(dest.path()).rsync_arg(true);
                let link_dest = format!("--link-dest={from}");
                self.shell
                    .run(
                        Some(host),
                        "rsync",
                        &["-rlptgoDEAXWSH", "--delete", link_dest.as_str(), from.as_str(), to.as_str()],
                    )
                    .await?;
                Ok(())
            }
        }
    }

    async fn catalog(&self, loc: &Location, order: SortOrder) -> Result<Catalog> {
        if loc.is_local() {
            let path = loc.path().to_path_buf();
            return tokio::task::spawn_blocking(move || Catalog::list(&path, order))
                .await
                .map_err(|e| SnapError::Sync(format!("listing task failed: {e}")))?;
        }
        catalog_from_listing(self, loc, order).await
    }
}

fn require_same_host(a: &Location, b: &Location) -> Result<()> {
    if a.same_host(b) {
        Ok(())
    } else {
        Err(SnapError::Sync(format!("{a} and {b} are not on the same host")))
    }
}

fn local_dir_status(path: &Path, access: Access) -> DirStatus {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return DirStatus::Missing,
        Err(e) if e.kind() == ErrorKind::NotFound => return DirStatus::Missing,
        Err(_) => return DirStatus::Denied,
    }

    #[cfg(unix)]
    {
        use nix::unistd::{access as check_access, AccessFlags};

        let flags = match access {
            Access::Read => AccessFlags::R_OK | AccessFlags::X_OK,
            Access::Write => AccessFlags::W_OK | AccessFlags::X_OK,
        };
        if check_access(path, flags).is_err() {
            return DirStatus::Denied;
        }
    }

    #[cfg(not(unix))]
    let _ = access;

    DirStatus::Ok
}

fn local_list_names(path: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
    }
    Ok(names)
}
