//! Sync engine pushing a local tree to a remote directory.
//!
//! A pass runs in three steps:
//!
//! 1. **Walk**: depth-first traversal of the local root. Directories the ignore matcher
//!    excludes are pruned and never descended into, so a negated rule cannot rescue a file
//!    below a pruned directory.
//! 2. **Plan**: included files are mapped to `<remote_root>/<relative path>` and, in
//!    incremental mode, dropped when their SHA256 matches the checksum table.
//! 3. **Transfer**: each planned file is uploaded (parent directory first), its digest is
//!    recorded, and the whole table is written back to the remote when the pass ends.
//!
//! Uploads are additive. Nothing is deleted remotely and stale table entries are kept.
//!
//! # Example
//!
//! ```rust,ignore
//! use rpi_deploy::sync::{SyncEngine, load_checksums};
//!
//! let mut store = load_checksums(&mut session, "dash/.checksums.csv")?;
//! let engine = SyncEngine::new(&matcher, "dash/.checksums.csv");
//! let report = engine.sync_tree(&mut session, &local_engine, "dash/engine", &mut store)?;
//! println!("uploaded {} of {} files", report.files_uploaded(), report.files_considered);
//! ```

use std::path::{Path, PathBuf};
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use walkdir::WalkDir;

use crate::checksum::ChecksumStore;
use crate::config::ChecksumMode;
use crate::error::{DeployError, Result};
use crate::ignore::IgnoreMatcher;
use crate::remote::{RemoteSession, remote_join};

/// One file to upload in the current pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    /// Absolute local path.
    pub local: PathBuf,
    /// Path relative to the local root, `/`-separated.
    pub relative: String,
    /// Destination path on the remote.
    pub remote: String,
    /// Digest computed while planning; recorded once the upload succeeds.
    pub digest: Option<String>,
    pub size: u64,
}

/// Files selected for upload, plus what was filtered out on the way.
#[derive(Debug, Clone, Default)]
pub struct TransferPlan {
    pub entries: Vec<PlanEntry>,
    /// Files that passed the ignore matcher.
    pub files_considered: usize,
    /// Files skipped because the remote already has the same bytes.
    pub files_unchanged: usize,
}

impl TransferPlan {
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }
}

/// Result of syncing one local tree.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub local_root: PathBuf,
    pub remote_root: String,
    pub files_considered: usize,
    pub files_unchanged: usize,
    /// Remote paths uploaded, in upload order.
    pub uploaded: Vec<String>,
    pub bytes_uploaded: u64,
    /// Whether the checksum table was written back.
    pub checksums_persisted: bool,
    pub duration_ms: u64,
}

impl SyncReport {
    pub fn files_uploaded(&self) -> usize {
        self.uploaded.len()
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        format!(
            "{} -> {}: {} uploaded ({} bytes), {} unchanged, {} considered in {} ms",
            self.local_root.display(),
            self.remote_root,
            self.files_uploaded(),
            self.bytes_uploaded,
            self.files_unchanged,
            self.files_considered,
            self.duration_ms
        )
    }
}

/// Path of `path` relative to `root` with `/` separators; `None` for the root itself.
pub fn relative_posix(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Read the remote checksum table. Absent table yields an empty store.
pub fn load_checksums(session: &mut dyn RemoteSession, table_path: &str) -> Result<ChecksumStore> {
    let store = match session.read_file(table_path)? {
        Some(content) => ChecksumStore::parse(&content),
        None => ChecksumStore::new(),
    };
    tracing::info!(table = %table_path, records = store.len(), "loaded checksum table");
    Ok(store)
}

/// Pushes local trees to the remote through a [`RemoteSession`].
pub struct SyncEngine<'a> {
    matcher: &'a IgnoreMatcher,
    table_path: String,
    mode: ChecksumMode,
    show_progress: bool,
}

impl<'a> SyncEngine<'a> {
    /// Create an engine in incremental mode that persists the table to `table_path`.
    pub fn new(matcher: &'a IgnoreMatcher, table_path: impl Into<String>) -> Self {
        Self {
            matcher,
            table_path: table_path.into(),
            mode: ChecksumMode::Incremental,
            show_progress: false,
        }
    }

    pub fn with_checksum_mode(mut self, mode: ChecksumMode) -> Self {
        self.mode = mode;
        self
    }

    /// Draw a progress bar while uploading.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Included files under `local_root` as `(absolute path, relative path, size)`, in
    /// depth-first, name-sorted order.
    pub fn walk(&self, local_root: &Path) -> Result<Vec<(PathBuf, String, u64)>> {
        if !local_root.is_dir() {
            return Err(DeployError::Configuration(format!(
                "local root is not a directory: {}",
                local_root.display()
            )));
        }

        let walker = WalkDir::new(local_root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 || !entry.file_type().is_dir() {
                    return true;
                }
                let Some(rel) = relative_posix(local_root, entry.path()) else {
                    return true;
                };
                let keep = self.matcher.includes(&rel, true);
                if !keep {
                    tracing::debug!(dir = %rel, "pruned directory");
                }
                keep
            });

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.loop_ancestor().is_some() => {
                    tracing::warn!(error = %e, "skipping symlink loop");
                    continue;
                }
                Err(e) => {
                    let path = e
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| local_root.to_path_buf());
                    return Err(DeployError::transfer(path, e));
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(rel) = relative_posix(local_root, entry.path()) else {
                continue;
            };
            if !self.matcher.includes(&rel, false) {
                tracing::trace!(file = %rel, "excluded file");
                continue;
            }
            let size = entry
                .metadata()
                .map_err(|e| DeployError::transfer(entry.path(), e))?
                .len();
            files.push((entry.into_path(), rel, size));
        }
        Ok(files)
    }

    /// Walk `local_root` and keep the files that have to be uploaded.
    pub fn plan(
        &self,
        local_root: &Path,
        remote_root: &str,
        store: &ChecksumStore,
    ) -> Result<TransferPlan> {
        let mut plan = TransferPlan::default();
        for (local, relative, size) in self.walk(local_root)? {
            plan.files_considered += 1;
            let remote = remote_join(remote_root, &relative);

            let digest = if self.mode.records() {
                let changed = store
                    .changed_digest(&remote, &local)
                    .map_err(|e| DeployError::transfer(&local, e))?;
                match changed {
                    Some(digest) => Some(digest),
                    None if self.mode.filters() => {
                        plan.files_unchanged += 1;
                        continue;
                    }
                    None => store.get(&remote).map(str::to_string),
                }
            } else {
                None
            };

            plan.entries.push(PlanEntry {
                local,
                relative,
                remote,
                digest,
                size,
            });
        }
        Ok(plan)
    }

    /// Sync one tree: walk, filter, upload, then persist the checksum table.
    ///
    /// The first failed upload aborts the pass. Digests of files uploaded before the failure
    /// are still written back, so a rerun only retries what did not make it.
    pub fn sync_tree(
        &self,
        session: &mut dyn RemoteSession,
        local_root: &Path,
        remote_root: &str,
        store: &mut ChecksumStore,
    ) -> Result<SyncReport> {
        let start = Instant::now();
        let plan = self.plan(local_root, remote_root, store)?;
        let dry_run = session.is_dry_run();

        tracing::info!(
            local = %local_root.display(),
            remote = %remote_root,
            considered = plan.files_considered,
            unchanged = plan.files_unchanged,
            to_upload = plan.entries.len(),
            bytes = plan.total_bytes(),
            "transfer plan ready"
        );

        let mut report = SyncReport {
            local_root: local_root.to_path_buf(),
            remote_root: remote_root.to_string(),
            files_considered: plan.files_considered,
            files_unchanged: plan.files_unchanged,
            ..Default::default()
        };

        let progress = self.progress_bar(plan.entries.len() as u64);
        let mut failure = None;
        for entry in &plan.entries {
            let line = format!("Uploading: {} -> {}", entry.local.display(), entry.remote);
            if progress.is_hidden() {
                println!("{line}");
            } else {
                progress.println(line);
            }
            if let Err(e) = session.upload_file(&entry.local, &entry.remote) {
                tracing::warn!(remote = %entry.remote, error = %e, "upload failed");
                failure = Some(e);
                break;
            }
            if !dry_run && let Some(digest) = &entry.digest {
                store.record(entry.remote.clone(), digest.clone());
            }
            report.uploaded.push(entry.remote.clone());
            report.bytes_uploaded += entry.size;
            progress.inc(1);
        }
        progress.finish_and_clear();

        if self.mode.records() {
            let persisted = self.persist_checksums(session, store);
            match (persisted, failure) {
                (Ok(written), None) => report.checksums_persisted = written,
                (Err(e), None) => return Err(e),
                (Err(persist_err), Some(e)) => {
                    tracing::warn!(error = %persist_err, "could not save checksums after failure");
                    return Err(e);
                }
                (Ok(_), Some(e)) => return Err(e),
            }
        } else if let Some(e) = failure {
            return Err(e);
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            remote = %remote_root,
            uploaded = report.files_uploaded(),
            bytes = report.bytes_uploaded,
            duration_ms = report.duration_ms,
            "sync pass complete"
        );
        Ok(report)
    }

    /// Replace the remote checksum table with the store's contents.
    ///
    /// The table goes through a local staging file. Returns `false` when nothing was written
    /// (dry run).
    pub fn persist_checksums(
        &self,
        session: &mut dyn RemoteSession,
        store: &ChecksumStore,
    ) -> Result<bool> {
        if session.is_dry_run() {
            tracing::info!(table = %self.table_path, records = store.len(), "[dry-run] skipping checksum table upload");
            return Ok(false);
        }

        let staging_err = |e: std::io::Error| DeployError::transfer(&self.table_path, e);
        let staging = tempfile::Builder::new()
            .prefix("rpi-deploy-checksums")
            .suffix(".csv")
            .tempfile()
            .map_err(staging_err)?;
        store.save_file(staging.path()).map_err(staging_err)?;

        session.upload_file(staging.path(), &self.table_path)?;
        tracing::info!(table = %self.table_path, records = store.len(), "saved checksum table");
        Ok(true)
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let style = ProgressStyle::with_template(
            "{spinner} Uploading files [{bar:30}] {pos}/{len} ({elapsed})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
        ProgressBar::new(len).with_style(style)
    }
}
