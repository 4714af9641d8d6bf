use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use serde::Serialize;
use serde_json::Value;
use tokio::fs;

use crate::{
    capture::CaptureEngine,
    extractor::MetadataExtractor,
    prober::LivenessProbe,
    types::{CaptureResult, ErrorRecord, ItemError, RunError, RunSummary, WorkItem},
    uploader::StorageSink,
    utils::{
        append_json_file, artifact_key, ensure_scratch_dirs, images_dir, sanitize_name,
        is_partial_file, is_screenshot_file, DEFAULT_OUTPUT_DIR, ERRORS_KEY, RESULTS_KEY,
    },
};

#[derive(Builder, Debug, Clone)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct RunnerOptions {
    // number of results accumulated before they are flushed to storage
    #[builder(default = "5")]
    batch_size: usize,
    // scratch directory, screenshots live in <output_dir>/images until flushed
    #[builder(default = "self.default_output_dir()")]
    output_dir: PathBuf,
    // collection key for capture results
    #[builder(default = "RESULTS_KEY.into()")]
    results_key: String,
    // collection key for error records
    #[builder(default = "ERRORS_KEY.into()")]
    errors_key: String,
    // mirror every flushed collection to <output_dir>/<key>
    #[builder(default = "true")]
    local_mirror: bool,
}

impl RunnerOptions {
    pub fn default_builder() -> RunnerOptionsBuilder {
        RunnerOptionsBuilder::default()
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl RunnerOptionsBuilder {
    fn default_output_dir(&self) -> PathBuf {
        PathBuf::from(DEFAULT_OUTPUT_DIR)
    }

    fn validate(&self) -> Result<(), String> {
        match self.batch_size {
            Some(0) => Err("batch_size must be at least 1".into()),
            _ => Ok(()),
        }
    }
}

/// Drives work items one at a time through liveness, metadata, screenshot
/// and upload, flushing results in fixed size batches.
///
/// Items are never processed concurrently: the sink's merge-append has no
/// concurrency guard, so this runner must stay the only writer of its
/// collection keys.
pub struct Runner {
    prober: Arc<dyn LivenessProbe>,
    extractor: Arc<dyn MetadataExtractor>,
    capture: CaptureEngine,
    sink: Arc<dyn StorageSink>,
    options: RunnerOptions,
    should_terminate: Arc<AtomicBool>,
}

#[derive(Default)]
struct Pending {
    results: Vec<CaptureResult>,
    errors: Vec<ErrorRecord>,
}

impl Runner {
    pub fn new(
        prober: Arc<dyn LivenessProbe>,
        extractor: Arc<dyn MetadataExtractor>,
        capture: CaptureEngine,
        sink: Arc<dyn StorageSink>,
        options: RunnerOptions,
    ) -> Self {
        Runner {
            prober,
            extractor,
            capture,
            sink,
            options,
            should_terminate: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Once the flag is set no further item is dequeued; pending records are
    /// still flushed.
    pub fn with_termination_flag(mut self, should_terminate: Arc<AtomicBool>) -> Self {
        self.should_terminate = should_terminate;
        self
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    pub async fn run(&self, items: &[WorkItem]) -> Result<RunSummary, RunError> {
        let images = ensure_scratch_dirs(&self.options.output_dir).map_err(|source| {
            RunError::Setup {
                path: images_dir(&self.options.output_dir),
                source,
            }
        })?;
        debug!("scratch directory ready at {:?}", images);

        info!(
            "processing {} urls in batches of {}",
            items.len(),
            self.options.batch_size
        );

        let mut summary = RunSummary::default();
        let mut pending = Pending::default();

        for item in items {
            if self.should_terminate.load(Ordering::Relaxed) {
                warn!(
                    "termination requested, stopping after {} of {} urls",
                    summary.processed_count,
                    items.len()
                );
                break;
            }
            summary.last_processed_name = item.name.clone();
            summary.processed_count += 1;

            let (result, error) = self.process_item(item).await;
            pending.results.push(result);
            if let Some(e) = error {
                pending.errors.push(e);
            }

            if pending.results.len() >= self.options.batch_size {
                self.flush(&mut pending).await?;
            }
        }

        if !pending.results.is_empty() || !pending.errors.is_empty() {
            self.flush(&mut pending).await?;
        }

        info!(
            "run complete, last processed {:?}, {} processed",
            summary.last_processed_name, summary.processed_count
        );
        Ok(summary)
    }

    /// Always yields a result. The error record is only set for failures
    /// after liveness passed.
    async fn process_item(&self, item: &WorkItem) -> (CaptureResult, Option<ErrorRecord>) {
        let mut result = CaptureResult::inactive(item);

        if !self.prober.probe(&item.url).await {
            info!("{} ({}) is not reachable", item.url, item.name);
            return (result, None);
        }
        result.active = true;

        match self.enrich_and_capture(item, &mut result).await {
            Ok(()) => {
                debug!("{} ({}) recorded", item.url, item.name);
                (result, None)
            }
            Err(e) => {
                error!("error processing {} ({}): {}", item.url, item.name, e);
                let record = ErrorRecord::new(item, &e);
                (result, Some(record))
            }
        }
    }

    async fn enrich_and_capture(
        &self,
        item: &WorkItem,
        result: &mut CaptureResult,
    ) -> Result<(), ItemError> {
        match self.extractor.extract(&item.url).await {
            Ok(metadata) => result.set_metadata(metadata),
            Err(e) if e.is_degraded() => {
                warn!("no metadata for {}: {}", item.url, e);
            }
            Err(e) => return Err(ItemError::Extract(e)),
        }

        let sanitized = sanitize_name(&item.name);
        let artifact = match self
            .capture
            .capture(&item.url, &sanitized, &self.options.output_dir)
            .await
        {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("screenshot error for {}: {}", item.url, e);
                None
            }
        };

        if let Some(path) = artifact {
            let key =
                artifact_key(&path).map_err(|e| ItemError::ArtifactKey(e.to_string()))?;
            let url = self.sink.put_artifact(&path, &key).await?;
            debug!("screenshot of {} available at {}", item.url, url);
            result.screenshot_url = Some(url);
        }
        Ok(())
    }

    async fn flush(&self, pending: &mut Pending) -> Result<(), RunError> {
        if !pending.results.is_empty() {
            let results = std::mem::take(&mut pending.results);
            self.merge(&self.options.results_key, &results).await?;
        }
        if !pending.errors.is_empty() {
            let errors = std::mem::take(&mut pending.errors);
            self.merge(&self.options.errors_key, &errors).await?;
        }
        self.sweep_artifacts().await;
        Ok(())
    }

    async fn merge<T: Serialize>(&self, key: &str, records: &[T]) -> Result<usize, RunError> {
        let values = records
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<Value>, _>>()?;

        if self.options.local_mirror {
            let local = self.options.output_dir.join(key);
            if let Err(e) = append_json_file(&local, &values) {
                error!("could not mirror {} locally: {}", key, e);
            }
        }

        let total = self
            .sink
            .merge_append(key, values)
            .await
            .map_err(|source| RunError::Flush {
                key: key.into(),
                source,
            })?;
        info!(
            "flushed {} records to {}, {} stored",
            records.len(),
            key,
            total
        );
        Ok(total)
    }

    /// Uploads every finished screenshot left in the scratch directory and
    /// deletes each one once its upload succeeded. A file whose upload fails
    /// stays for the next sweep. Abandoned partial files are removed.
    async fn sweep_artifacts(&self) -> usize {
        let dir = images_dir(&self.options.output_dir);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) => {
                error!("could not list {:?}: {}", dir, e);
                return 0;
            }
        };

        let mut uploaded = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    error!("could not read entry in {:?}: {}", dir, e);
                    break;
                }
            };
            let path = entry.path();
            // items run one at a time, so no capture is writing during a sweep
            if is_partial_file(&path) {
                match fs::remove_file(&path).await {
                    Ok(()) => debug!("removed abandoned partial screenshot {:?}", path),
                    Err(e) => warn!("could not remove partial screenshot {:?}: {}", path, e),
                }
                continue;
            }
            if !is_screenshot_file(&path) {
                continue;
            }
            let key = match artifact_key(&path) {
                Ok(k) => k,
                Err(e) => {
                    warn!("skipping {:?}: {}", path, e);
                    continue;
                }
            };
            if let Err(e) = self.sink.put_artifact(&path, &key).await {
                warn!("could not upload {:?}, keeping it: {}", path, e);
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => {
                    uploaded += 1;
                    debug!("uploaded and deleted local image file {:?}", path);
                }
                Err(e) => warn!("uploaded {:?} but could not delete it: {}", path, e),
            }
        }
        uploaded
    }
}
