//! rsync backed sync driver.
//!
//! A snapshot is first built in `<dest>.tmp` (seeded with a hardlink copy of
//! the baseline) and only renamed to its final name once rsync succeeded, so
//! an interrupted run never leaves something that looks like a snapshot.
//!
//! With a mv-record, the source is hardlink-copied into a temporary sibling
//! directory and rsync gets two sources at once: the mv-record (whose layout
//! matches the baseline) and that temporary copy. With `-H`, files that were
//! only moved since the last backup are still hardlinked to the mv-record and
//! therefore end up hardlinked to the baseline instead of being copied again.

use super::stats::outcome_from_stats;
use super::{SyncDriver, SyncOutcome, SyncRequest};
use crate::storage::{Access, DirStatus, LineAction, Location, Shell, StorageMutator};
use crate::utils::errors::{Result, SnapError};
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Archive flags: recursive, links, perms, times, group, owner, devices,
/// executability, ACLs, xattrs, whole files, sparse files, hardlinks.
const ARCHIVE_FLAGS: &str = "-rlptgoDEAXWSH";

/// Attempts at finding an unused temporary source name.
const TEMP_NAME_ATTEMPTS: usize = 8;

#[derive(Debug, Clone)]
pub struct RsyncOptions {
    /// rsync executable
    pub program: String,

    /// Extra arguments appended after the fixed flags
    pub extra_args: Vec<String>,

    /// Keep rsync's file list in the log
    pub verbose: bool,
}

impl Default for RsyncOptions {
    fn default() -> Self {
        Self {
            program: "rsync".to_string(),
            extra_args: Vec::new(),
            verbose: false,
        }
    }
}

pub struct RsyncDriver<S> {
    storage: S,
    shell: Shell,
    options: RsyncOptions,
}

impl<S: StorageMutator> RsyncDriver<S> {
    pub fn new(storage: S, shell: Shell, options: RsyncOptions) -> Self {
        Self {
            storage,
            shell,
            options,
        }
    }

    /// Full rsync argument list for `sources` into `dest`.
    pub fn build_args(&self, sources: &[String], dest: String, dry_run: bool) -> Vec<String> {
        let mut args = vec![
            ARCHIVE_FLAGS.to_string(),
            "--delete".to_string(),
            "--no-inc-recursive".to_string(),
            // Protect remote paths from word splitting on the remote shell
            "-s".to_string(),
        ];
        args.extend(self.options.extra_args.iter().cloned());
        if let Some(transport) = self.shell.rsync_ssh_transport() {
            args.push("-e".to_string());
            args.push(transport);
        }
        if dry_run {
            args.push("-n".to_string());
            args.push("--stats".to_string());
        } else if self.options.verbose {
            args.push("-v".to_string());
        } else {
            args.push("-q".to_string());
        }
        args.extend(sources.iter().cloned());
        args.push(dest);
        args
    }

    async fn run_rsync(&self, args: Vec<String>) -> Result<Vec<String>> {
        let mut cmd = Command::new(&self.options.program);
        cmd.args(&args);
        info!(" $ {} {}", self.options.program, args.join(" "));

        self.shell
            .run_streaming(cmd, |line| {
                debug!(" (rsync) {}", line);
                // rsync reports its own errors on lines starting with "rsync:"
                if line.starts_with("rsync:") {
                    LineAction::Abort
                } else {
                    LineAction::Continue
                }
            })
            .await
    }

    /// Name for the temporary source copy that is unused both next to the
    /// source and inside the mv-record.
    async fn temp_source_name(&self, mv_record: &Location, source_parent: &Location) -> Result<String> {
        for _ in 0..TEMP_NAME_ATTEMPTS {
            let name = format!("{}.tmp", Uuid::new_v4().simple());
            let free_in_record =
                self.storage.dir_status(&mv_record.join(&name), Access::Read).await? == DirStatus::Missing;
            let free_next_to_source =
                self.storage.dir_status(&source_parent.join(&name), Access::Read).await? == DirStatus::Missing;
            if free_in_record && free_next_to_source {
                return Ok(name);
            }
        }
        Err(SnapError::Sync("could not find a free temporary name".to_string()))
    }

    async fn remove_quietly(&self, loc: &Location) {
        if let Err(e) = self.storage.remove(loc).await {
            warn!(path = %loc, error = %e, "Failed to remove temporary directory");
        }
    }

    async fn dry_run(&self, request: &SyncRequest, dest_tmp: &Location) -> Result<SyncOutcome> {
        // Compare straight against the baseline; `-n` keeps it untouched.
        let target = request.baseline.as_ref().unwrap_or(dest_tmp);
        let args = self.build_args(&[request.source.rsync_arg(true)], target.rsync_arg(true), true);
        let output = self.run_rsync(args).await?;
        Ok(outcome_from_stats(&output))
    }

    async fn transfer_plain(&self, request: &SyncRequest, dest_tmp: &Location) -> Result<()> {
        let args = self.build_args(&[request.source.rsync_arg(true)], dest_tmp.rsync_arg(true), false);
        self.run_rsync(args).await?;
        self.storage.rename(dest_tmp, &request.destination).await
    }

    async fn transfer_with_mv_record(
        &self,
        request: &SyncRequest,
        mv_record: &Location,
        dest_tmp: &Location,
    ) -> Result<()> {
        let parent = request.source.parent().ok_or_else(|| {
            SnapError::Sync(format!("source {} has no parent directory", request.source))
        })?;
        let tmp_name = self.temp_source_name(mv_record, &parent).await?;
        let src_tmp = parent.join(&tmp_name);

        let result = async {
            self.storage.hardlink_copy(&request.source, &src_tmp).await?;
            let args = self.build_args(
                &[mv_record.rsync_arg(true), src_tmp.rsync_arg(false)],
                dest_tmp.rsync_arg(true),
                false,
            );
            self.run_rsync(args).await?;
            self.storage
                .rename(&dest_tmp.join(&tmp_name), &request.destination)
                .await
        }
        .await;

        self.remove_quietly(dest_tmp).await;
        self.remove_quietly(&src_tmp).await;
        result
    }

    async fn transfer(&self, request: &SyncRequest, dest_tmp: &Location) -> Result<()> {
        if let Some(baseline) = &request.baseline {
            self.storage.hardlink_copy(baseline, dest_tmp).await?;
        }

        let mv_record = match (&request.mv_record, &request.baseline) {
            (Some(mv_record), Some(_)) => {
                if self.storage.dir_status(mv_record, Access::Read).await? == DirStatus::Ok {
                    Some(mv_record)
                } else {
                    warn!(mv_record = %mv_record, "mv-record not available, move detection disabled");
                    None
                }
            }
            _ => None,
        };

        match mv_record {
            Some(mv_record) => self.transfer_with_mv_record(request, mv_record, dest_tmp).await,
            None => self.transfer_plain(request, dest_tmp).await,
        }
    }
}

impl<S: StorageMutator> SyncDriver for RsyncDriver<S> {
    async fn sync(&self, request: &SyncRequest) -> Result<SyncOutcome> {
        let dest_tmp = request.destination.with_suffix(".tmp");

        if request.dry_run {
            return self.dry_run(request, &dest_tmp).await;
        }

        match self.transfer(request, &dest_tmp).await {
            Ok(()) => Ok(SyncOutcome::Changed),
            Err(e) => {
                self.remove_quietly(&dest_tmp).await;
                Err(e)
            }
        }
    }
}
