//! Upload artifact cleanup.
//!
//! Removes stale temporary uploads and uploaded files no longer referenced
//! from the store. Files are removed in batches; a file that cannot be
//! removed is recorded and the rest of the batch continues.
//!
//! Unreferenced removal never runs against an empty reference set, and by
//! default the references are read again before every batch so a file
//! referenced mid-pass survives.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use common::config::FileCleanupConfig;
use common::store::RelationalStore;
use serde::Serialize;
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::error::MaintenanceError;
use crate::metrics::MaintenanceMetrics;

/// Where the janitor learns which uploads are still in use.
#[async_trait]
pub trait ReferenceSource: Send + Sync {
    /// Upload paths still referenced, in whatever form the store keeps them
    async fn referenced_paths(&self) -> Result<Vec<String>, MaintenanceError>;
}

/// References listed by a query whose first column is the upload path.
pub struct StoreReferences {
    store: Arc<dyn RelationalStore>,
    query: String,
}

impl StoreReferences {
    pub fn new(store: Arc<dyn RelationalStore>, query: impl Into<String>) -> Self {
        Self {
            store,
            query: query.into(),
        }
    }
}

#[async_trait]
impl ReferenceSource for StoreReferences {
    async fn referenced_paths(&self) -> Result<Vec<String>, MaintenanceError> {
        Ok(self.store.query_strings(&self.query).await?)
    }
}

#[derive(Debug, Clone)]
struct FileCandidate {
    path: PathBuf,
    /// Path below the scanned root, `/`-separated
    relative: String,
    size_bytes: u64,
    modified: SystemTime,
}

/// Outcome of one cleanup pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCleanupReport {
    pub scanned: usize,
    pub removed: usize,
    pub bytes_freed: u64,
    pub dry_run: bool,
    /// The pass was refused because no reference was returned
    pub skipped: bool,
    /// Candidates spared because revalidation found them referenced or
    /// could not be completed
    pub kept_after_revalidation: usize,
    /// `(path, error)` for files that could not be removed
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<(String, String)>,
}

pub struct FileJanitor {
    config: FileCleanupConfig,
    metrics: MaintenanceMetrics,
}

impl FileJanitor {
    pub fn new(config: &FileCleanupConfig, metrics: MaintenanceMetrics) -> Self {
        Self {
            config: config.clone(),
            metrics,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Query listing the upload paths still referenced, if configured
    pub fn reference_query(&self) -> Option<&str> {
        self.config.reference_query.as_deref()
    }

    /// Remove temporary files older than `temp_max_age`.
    pub async fn purge_temp_files(&self) -> Result<FileCleanupReport, MaintenanceError> {
        self.purge_temp_files_at(SystemTime::now()).await
    }

    pub async fn purge_temp_files_at(
        &self,
        now: SystemTime,
    ) -> Result<FileCleanupReport, MaintenanceError> {
        let root = Path::new(&self.config.temp_dir);
        let candidates = scan(root).await?;
        let scanned = candidates.len();
        let stale: Vec<_> = candidates
            .into_iter()
            .filter(|c| age(now, c.modified) > self.config.temp_max_age)
            .collect();

        debug!(dir = %root.display(), scanned, stale = stale.len(), "Scanned temporary uploads");
        let mut report = self.remove(stale, None).await;
        report.scanned = scanned;
        info!(
            dir = %root.display(),
            removed = report.removed,
            bytes_freed = report.bytes_freed,
            failures = report.failures.len(),
            dry_run = report.dry_run,
            "Temporary upload cleanup completed"
        );
        Ok(report)
    }

    /// Remove uploaded files older than the grace period that `references`
    /// does not list.
    pub async fn remove_unreferenced(
        &self,
        references: &dyn ReferenceSource,
    ) -> Result<FileCleanupReport, MaintenanceError> {
        self.remove_unreferenced_at(references, SystemTime::now())
            .await
    }

    pub async fn remove_unreferenced_at(
        &self,
        references: &dyn ReferenceSource,
        now: SystemTime,
    ) -> Result<FileCleanupReport, MaintenanceError> {
        let root = Path::new(&self.config.upload_dir);
        let candidates = scan(root).await?;
        let scanned = candidates.len();
        let stale: Vec<_> = candidates
            .into_iter()
            .filter(|c| age(now, c.modified) > self.config.grace_period)
            .collect();

        let mut report = FileCleanupReport {
            scanned,
            dry_run: self.config.dry_run,
            ..FileCleanupReport::default()
        };
        if stale.is_empty() {
            return Ok(report);
        }

        let referenced = self.referenced(references).await?;
        if referenced.is_empty() {
            warn!(
                dir = %root.display(),
                stale = stale.len(),
                "Reference query returned no paths, refusing to remove uploads"
            );
            report.skipped = true;
            return Ok(report);
        }

        let orphans: Vec<_> = stale
            .into_iter()
            .filter(|c| !referenced.contains(&c.relative))
            .collect();
        debug!(
            dir = %root.display(),
            scanned,
            referenced = referenced.len(),
            unreferenced = orphans.len(),
            "Scanned uploads"
        );

        let revalidate = self.config.revalidate_before_delete.then_some(references);
        report = self.remove(orphans, revalidate).await;
        report.scanned = scanned;
        info!(
            dir = %root.display(),
            removed = report.removed,
            bytes_freed = report.bytes_freed,
            kept = report.kept_after_revalidation,
            failures = report.failures.len(),
            dry_run = report.dry_run,
            "Unreferenced upload cleanup completed"
        );
        Ok(report)
    }

    async fn referenced(
        &self,
        references: &dyn ReferenceSource,
    ) -> Result<HashSet<String>, MaintenanceError> {
        Ok(references
            .referenced_paths()
            .await?
            .iter()
            .filter_map(|path| normalize_reference(path, &self.config.upload_dir))
            .collect())
    }

    /// Candidates of `batch` that are still unreferenced. Any doubt keeps
    /// the whole batch.
    async fn revalidate_batch(
        &self,
        batch: &[FileCandidate],
        references: &dyn ReferenceSource,
    ) -> Vec<FileCandidate> {
        let referenced = match self.referenced(references).await {
            Ok(referenced) if !referenced.is_empty() => referenced,
            Ok(_) => {
                warn!(batch_size = batch.len(), "Revalidation returned no references, keeping batch");
                return Vec::new();
            }
            Err(e) => {
                error!(error = %e, batch_size = batch.len(), "Revalidation failed, keeping batch");
                return Vec::new();
            }
        };

        batch
            .iter()
            .filter(|candidate| {
                let still_orphan = !referenced.contains(&candidate.relative);
                if !still_orphan {
                    warn!(
                        path = %candidate.path.display(),
                        "File referenced again after revalidation, skipping removal"
                    );
                }
                still_orphan
            })
            .cloned()
            .collect()
    }

    async fn remove(
        &self,
        candidates: Vec<FileCandidate>,
        revalidate: Option<&dyn ReferenceSource>,
    ) -> FileCleanupReport {
        let dry_run = self.config.dry_run;
        let mut report = FileCleanupReport {
            dry_run,
            ..FileCleanupReport::default()
        };
        if candidates.is_empty() {
            return report;
        }

        let batch_size = self.config.batch_size.max(1);
        let total_batches = candidates.len().div_ceil(batch_size);
        for (batch_idx, batch) in candidates.chunks(batch_size).enumerate() {
            debug!(
                batch = batch_idx + 1,
                total_batches,
                batch_size = batch.len(),
                dry_run,
                "Processing file removal batch"
            );

            let validated = match revalidate {
                Some(references) => self.revalidate_batch(batch, references).await,
                None => batch.to_vec(),
            };
            report.kept_after_revalidation += batch.len() - validated.len();

            for candidate in &validated {
                if dry_run {
                    info!(
                        path = %candidate.path.display(),
                        size_bytes = candidate.size_bytes,
                        "[DRY-RUN] Would remove file"
                    );
                    report.removed += 1;
                    report.bytes_freed += candidate.size_bytes;
                    continue;
                }

                match fs::remove_file(&candidate.path).await {
                    Ok(()) => {
                        report.removed += 1;
                        report.bytes_freed += candidate.size_bytes;
                    }
                    // removed concurrently
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => {
                        warn!(path = %candidate.path.display(), error = %e, "Failed to remove file");
                        report
                            .failures
                            .push((candidate.path.display().to_string(), e.to_string()));
                    }
                }
            }
            tokio::task::yield_now().await;
        }

        if !dry_run {
            self.metrics
                .record_files_removed(report.removed, report.bytes_freed);
        }
        report
    }
}

fn age(now: SystemTime, modified: SystemTime) -> Duration {
    now.duration_since(modified).unwrap_or_default()
}

fn path_segments(path: &str) -> Vec<&str> {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect()
}

/// Bring a stored reference into the form scanned paths take: relative to
/// the upload directory, `/`-separated, without `.` or empty segments.
fn normalize_reference(path: &str, upload_dir: &str) -> Option<String> {
    let path = path.trim().replace('\\', "/");
    let upload_dir = upload_dir.replace('\\', "/");
    let segments = path_segments(&path);
    let root = path_segments(&upload_dir);

    let relative = if !root.is_empty() && segments.starts_with(&root) {
        &segments[root.len()..]
    } else {
        &segments[..]
    };
    (!relative.is_empty()).then(|| relative.join("/"))
}

/// Regular files below `root`, recursively. A missing root yields nothing.
async fn scan(root: &Path) -> Result<Vec<FileCandidate>, MaintenanceError> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let path = entry.path();
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let metadata = entry.metadata().await?;
                let relative = path
                    .strip_prefix(root)
                    .unwrap_or(&path)
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                files.push(FileCandidate {
                    relative,
                    size_bytes: metadata.len(),
                    modified: metadata.modified()?,
                    path,
                });
            }
        }
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(24 * 3600);

    /// Answers successive reference lookups in order, repeating the last.
    struct ScriptedReferences {
        answers: Vec<Option<Vec<String>>>,
        calls: Mutex<usize>,
    }

    fn paths(paths: &[&str]) -> Option<Vec<String>> {
        Some(paths.iter().map(|p| p.to_string()).collect())
    }

    impl ScriptedReferences {
        fn new(answers: Vec<Option<Vec<String>>>) -> Self {
            Self {
                answers,
                calls: Mutex::new(0),
            }
        }

        fn always(listed: &[&str]) -> Self {
            Self::new(vec![paths(listed)])
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl ReferenceSource for ScriptedReferences {
        async fn referenced_paths(&self) -> Result<Vec<String>, MaintenanceError> {
            let mut calls = self.calls.lock().unwrap();
            let answer = &self.answers[(*calls).min(self.answers.len() - 1)];
            *calls += 1;
            match answer {
                Some(paths) => Ok(paths.clone()),
                None => Err(MaintenanceError::Io(std::io::Error::other(
                    "reference lookup failed",
                ))),
            }
        }
    }

    fn config(temp: &Path, uploads: &Path, dry_run: bool) -> FileCleanupConfig {
        FileCleanupConfig {
            enabled: true,
            temp_dir: temp.display().to_string(),
            upload_dir: uploads.display().to_string(),
            batch_size: 2,
            dry_run,
            ..FileCleanupConfig::default()
        }
    }

    fn janitor(temp: &Path, uploads: &Path, dry_run: bool) -> (FileJanitor, MaintenanceMetrics) {
        let metrics = MaintenanceMetrics::new();
        let janitor = FileJanitor::new(&config(temp, uploads, dry_run), metrics.clone());
        (janitor, metrics)
    }

    fn write(root: &Path, relative: &str, contents: &str) -> PathBuf {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn later() -> SystemTime {
        SystemTime::now() + 2 * DAY
    }

    #[tokio::test]
    async fn test_missing_directories_are_a_noop() {
        let dir = TempDir::new().unwrap();
        let (janitor, _) = janitor(&dir.path().join("tmp"), &dir.path().join("uploads"), false);

        let report = janitor.purge_temp_files().await.unwrap();
        assert_eq!(report, FileCleanupReport::default());
        let references = ScriptedReferences::always(&[]);
        let report = janitor.remove_unreferenced(&references).await.unwrap();
        assert_eq!(report.removed, 0);
        assert!(!report.skipped);
        // nothing to remove, so references are never read
        assert_eq!(references.calls(), 0);
    }

    #[tokio::test]
    async fn test_purge_respects_max_age() {
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("tmp");
        let a = write(&temp, "a.part", "12345");
        let b = write(&temp, "nested/b.part", "123");
        let (janitor, metrics) = janitor(&temp, &dir.path().join("uploads"), false);

        // Fresh files stay
        let report = janitor.purge_temp_files().await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.removed, 0);
        assert!(a.exists());

        let report = janitor.purge_temp_files_at(later()).await.unwrap();
        assert_eq!(report.removed, 2);
        assert_eq!(report.bytes_freed, 8);
        assert!(!a.exists());
        assert!(!b.exists());
        assert_eq!(metrics.summary().files_removed, 2);
        assert_eq!(metrics.summary().bytes_freed, 8);
    }

    #[tokio::test]
    async fn test_unreferenced_files_are_removed() {
        let dir = TempDir::new().unwrap();
        let uploads = dir.path().join("uploads");
        let kept = write(&uploads, "projects/1/spec.pdf", "kept");
        let orphan = write(&uploads, "projects/2/old.pdf", "orphan");
        let other = write(&uploads, "avatar.png", "x");
        let (janitor, _) = janitor(&dir.path().join("tmp"), &uploads, false);

        let references = ScriptedReferences::always(&["projects/1/spec.pdf"]);

        // Inside the grace period nothing is touched
        let report = janitor.remove_unreferenced(&references).await.unwrap();
        assert_eq!(report.removed, 0);

        let report = janitor
            .remove_unreferenced_at(&references, later())
            .await
            .unwrap();
        assert_eq!(report.scanned, 3);
        assert_eq!(report.removed, 2);
        assert!(kept.exists());
        assert!(!orphan.exists());
        assert!(!other.exists());
    }

    #[tokio::test]
    async fn test_reference_forms_match_scanned_paths() {
        let dir = TempDir::new().unwrap();
        let uploads = dir.path().join("uploads");
        let rooted = write(&uploads, "a.pdf", "a");
        let dotted = write(&uploads, "docs/b.pdf", "b");
        let prefixed = write(&uploads, "c.pdf", "c");
        let orphan = write(&uploads, "d.pdf", "d");
        let (janitor, _) = janitor(&dir.path().join("tmp"), &uploads, false);

        let full_path = format!("{}/c.pdf", uploads.display());
        let references = ScriptedReferences::always(&["/a.pdf", "./docs//b.pdf", full_path.as_str()]);

        let report = janitor
            .remove_unreferenced_at(&references, later())
            .await
            .unwrap();
        assert_eq!(report.removed, 1);
        assert!(rooted.exists());
        assert!(dotted.exists());
        assert!(prefixed.exists());
        assert!(!orphan.exists());
    }

    #[tokio::test]
    async fn test_empty_reference_set_removes_nothing() {
        let dir = TempDir::new().unwrap();
        let uploads = dir.path().join("uploads");
        let a = write(&uploads, "a.pdf", "a");
        let b = write(&uploads, "b.pdf", "b");
        let (janitor, metrics) = janitor(&dir.path().join("tmp"), &uploads, false);

        let report = janitor
            .remove_unreferenced_at(&ScriptedReferences::always(&[]), later())
            .await
            .unwrap();
        assert!(report.skipped);
        assert_eq!(report.scanned, 2);
        assert_eq!(report.removed, 0);
        assert!(a.exists());
        assert!(b.exists());
        assert_eq!(metrics.summary().files_removed, 0);
    }

    #[tokio::test]
    async fn test_revalidation_spares_newly_referenced_files() {
        let dir = TempDir::new().unwrap();
        let uploads = dir.path().join("uploads");
        let kept = write(&uploads, "a.pdf", "a");
        let attached = write(&uploads, "b.pdf", "b");
        let orphan = write(&uploads, "c.pdf", "c");
        let (janitor, _) = janitor(&dir.path().join("tmp"), &uploads, false);

        // b.pdf gets attached between the scan and the removal batch
        let references =
            ScriptedReferences::new(vec![paths(&["a.pdf"]), paths(&["a.pdf", "b.pdf"])]);
        let report = janitor
            .remove_unreferenced_at(&references, later())
            .await
            .unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.kept_after_revalidation, 1);
        assert!(kept.exists());
        assert!(attached.exists());
        assert!(!orphan.exists());
    }

    #[tokio::test]
    async fn test_failed_revalidation_keeps_batch() {
        let dir = TempDir::new().unwrap();
        let uploads = dir.path().join("uploads");
        write(&uploads, "a.pdf", "a");
        let b = write(&uploads, "b.pdf", "b");
        let c = write(&uploads, "c.pdf", "c");
        let (janitor, _) = janitor(&dir.path().join("tmp"), &uploads, false);

        let references = ScriptedReferences::new(vec![paths(&["a.pdf"]), None]);
        let report = janitor
            .remove_unreferenced_at(&references, later())
            .await
            .unwrap();
        assert_eq!(report.removed, 0);
        assert_eq!(report.kept_after_revalidation, 2);
        assert!(b.exists());
        assert!(c.exists());
    }

    #[tokio::test]
    async fn test_revalidation_can_be_disabled() {
        let dir = TempDir::new().unwrap();
        let uploads = dir.path().join("uploads");
        let orphan = write(&uploads, "b.pdf", "b");
        write(&uploads, "a.pdf", "a");
        let config = FileCleanupConfig {
            revalidate_before_delete: false,
            ..config(&dir.path().join("tmp"), &uploads, false)
        };
        let janitor = FileJanitor::new(&config, MaintenanceMetrics::new());

        let references = ScriptedReferences::new(vec![paths(&["a.pdf"]), None]);
        let report = janitor
            .remove_unreferenced_at(&references, later())
            .await
            .unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(references.calls(), 1);
        assert!(!orphan.exists());
    }

    #[tokio::test]
    async fn test_dry_run_keeps_files() {
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("tmp");
        let a = write(&temp, "a.part", "12345");
        let (janitor, metrics) = janitor(&temp, &dir.path().join("uploads"), true);

        let report = janitor.purge_temp_files_at(later()).await.unwrap();
        assert!(report.dry_run);
        assert_eq!(report.removed, 1);
        assert!(a.exists());
        assert_eq!(metrics.summary().files_removed, 0);
    }

    #[test]
    fn test_normalize_reference() {
        assert_eq!(normalize_reference("/a.pdf", "uploads"), Some("a.pdf".to_string()));
        assert_eq!(normalize_reference("./x/./y.pdf", "uploads"), Some("x/y.pdf".to_string()));
        assert_eq!(
            normalize_reference(" uploads/x\\y.pdf ", "./uploads"),
            Some("x/y.pdf".to_string())
        );
        assert_eq!(normalize_reference("/", "uploads"), None);
        assert_eq!(normalize_reference("", "uploads"), None);
    }

    #[tokio::test]
    async fn test_scan_relative_paths() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "b/c.txt", "");
        write(dir.path(), "a.txt", "");

        let files = scan(dir.path()).await.unwrap();
        let relative: Vec<_> = files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(relative, vec!["a.txt", "b/c.txt"]);
    }
}
