//! # Result Aggregator
//!
//! Reads the result files a run's batches produced, folds every call record into a
//! [`SummaryReport`], publishes one detail event per record and, once the run is finished,
//! the summary itself.
//!
//! ```text
//!  <output>/<run>-0.json ─┐
//!  <output>/<run>-1.json ─┼─▶ ResultRecord ─▶ SummaryReport ─▶ bus: summary channel
//!  <output>/<run>-N.json ─┘         │
//!                                   └──────▶ bus: details channel
//! ```
//!
//! Counters and [`Stat`](crate::stats::Stat) updates are order independent, so batches may
//! finish in any order.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use hct_infra_common::MessageBus;

use crate::config::EngineConfig;
use crate::error::{CallEngineError, Result};
use crate::report::{ResultRecord, SummaryReport};
use crate::types::RunId;

/// Builds and publishes run summaries
pub struct ResultAggregator {
    output_dir: PathBuf,
    descriptor_dir: PathBuf,
    bus: Arc<dyn MessageBus>,
    details_channel: String,
    summary_channel: String,
    finished: DashMap<RunId, SummaryReport>,
    /// Finalization order of `finished`, oldest first
    retention: Mutex<VecDeque<RunId>>,
    retained_summaries: usize,
}

impl ResultAggregator {
    pub fn new(config: &EngineConfig, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            output_dir: config.paths.output_dir.clone(),
            descriptor_dir: config.paths.descriptor_dir.clone(),
            bus,
            details_channel: config.bus.details.clone(),
            summary_channel: config.bus.summary.clone(),
            finished: DashMap::new(),
            retention: Mutex::new(VecDeque::new()),
            retained_summaries: config.reports.retained_summaries.max(1),
        }
    }

    /// Fold every result file of a run into a fresh summary.
    ///
    /// With `publish_details` each classified record is published on the details channel,
    /// only once every file has parsed. A line that does not parse aborts the whole pass.
    pub async fn process_result_stream(
        &self,
        run_id: &RunId,
        publish_details: bool,
    ) -> Result<SummaryReport> {
        let mut summary = SummaryReport::new(run_id.clone());
        let mut details = Vec::new();
        for path in run_files(&self.output_dir, run_id, "json").await? {
            debug!(run_id = %run_id, "processing {}", path.display());
            let content = tokio::fs::read_to_string(&path).await?;
            for (n, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let mut record: ResultRecord =
                    serde_json::from_str(line).map_err(|e| CallEngineError::MalformedResult {
                        path: path.clone(),
                        line: n + 1,
                        reason: e.to_string(),
                    })?;
                if summary.record(&mut record).is_some() && publish_details {
                    details.push(serde_json::to_string(&record)?);
                }
            }
        }
        for detail in details {
            self.bus.publish(&self.details_channel, detail).await?;
        }
        Ok(summary)
    }

    /// Build, publish and store the final summary, then remove the run's artifacts
    pub async fn finalize(&self, run_id: &RunId) -> Result<SummaryReport> {
        let summary = match self.process_result_stream(run_id, true).await {
            Ok(summary) => summary,
            Err(e) => {
                error!(run_id = %run_id, "❌ aggregation failed: {}", e);
                return Err(e);
            }
        };

        self.bus
            .publish(&self.summary_channel, serde_json::to_string(&summary)?)
            .await?;
        info!(
            run_id = %run_id,
            calls = summary.calls,
            connected = summary.connected,
            failed = summary.failed,
            reachable = summary.reachable,
            "📊 summary published"
        );
        self.retain(run_id, &summary);

        if let Err(e) = self.cleanup(run_id).await {
            warn!(run_id = %run_id, "cleanup failed: {}", e);
        }
        Ok(summary)
    }

    fn retain(&self, run_id: &RunId, summary: &SummaryReport) {
        if self.finished.insert(run_id.clone(), summary.clone()).is_some() {
            return;
        }
        let mut order = self.retention.lock();
        order.push_back(run_id.clone());
        while order.len() > self.retained_summaries {
            if let Some(oldest) = order.pop_front() {
                self.finished.remove(&oldest);
                debug!(run_id = %oldest, "evicted retained summary");
            }
        }
    }

    /// Final summary if the run is finished, otherwise one built from the results so far
    pub async fn summary(&self, run_id: &RunId) -> Result<SummaryReport> {
        if let Some(summary) = self.finished.get(run_id) {
            return Ok(summary.clone());
        }
        self.process_result_stream(run_id, false).await
    }

    pub fn is_finalized(&self, run_id: &RunId) -> bool {
        self.finished.contains_key(run_id)
    }

    /// Remove result files, backend logs and descriptors of a run
    pub async fn cleanup(&self, run_id: &RunId) -> Result<usize> {
        let mut files = run_files(&self.output_dir, run_id, "json").await?;
        files.extend(run_files(&self.output_dir, run_id, "log").await?);
        files.extend(run_files(&self.descriptor_dir, run_id, "xml").await?);

        for path in &files {
            debug!("cleanup: {}", path.display());
            tokio::fs::remove_file(path).await?;
        }
        Ok(files.len())
    }
}

/// Files named `<run>-<batch>.<extension>` in `dir`, sorted by batch index
async fn run_files(dir: &Path, run_id: &RunId, extension: &str) -> Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let prefix = format!("{}-", run_id);
    let suffix = format!(".{}", extension);
    let mut matches = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let index = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(&suffix))
            .and_then(|index| index.parse::<usize>().ok());
        if let Some(index) = index {
            matches.push((index, entry.path()));
        }
    }
    matches.sort();
    Ok(matches.into_iter().map(|(_, path)| path).collect())
}
