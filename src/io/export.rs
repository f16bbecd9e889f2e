//! Export job submission with status polling.
//!
//! Jobs are named deterministically from what they contain, so a retried
//! submission of the same content maps onto the same job instead of creating
//! a duplicate asset. The queue bounds concurrency, polls each job to a
//! terminal state and reports failures and timeouts per job.

use crate::core::classify::AreaRow;
use crate::core::labels::LabelTable;
use crate::io::archive::MissionDateEntry;
use crate::io::table::{export_filename, write_area_csv, write_label_csv, write_mission_dates_csv};
use crate::types::{code_from_mission, MosaicKey, PlumbError, PlumbResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

/// Export queue parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportParams {
    /// Labeler initials used in file names
    pub initials: String,
    /// Maximum jobs in flight
    pub max_concurrent: usize,
    pub poll_interval_ms: u64,
    pub timeout_ms: u64,
    /// Local export directory; platform data dir when unset
    pub output_dir: Option<PathBuf>,
}

impl Default for ExportParams {
    fn default() -> Self {
        Self {
            initials: "XXX".to_string(),
            max_concurrent: 4,
            poll_interval_ms: 500,
            timeout_ms: 10 * 60 * 1000,
            output_dir: None,
        }
    }
}

impl ExportParams {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Configured directory, else `<data_local_dir>/plumb/exports`
    pub fn resolve_output_dir(&self) -> PlumbResult<PathBuf> {
        if let Some(dir) = &self.output_dir {
            return Ok(dir.clone());
        }
        dirs::data_local_dir()
            .map(|d| d.join("plumb").join("exports"))
            .ok_or_else(|| PlumbError::Processing("No local data directory on this platform".to_string()))
    }
}

/// Table carried by an export job
#[derive(Debug, Clone)]
pub enum ExportPayload {
    Labels(LabelTable),
    Areas(Vec<AreaRow>),
    MissionDates(Vec<MissionDateEntry>),
}

impl ExportPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            ExportPayload::Labels(_) => "labels",
            ExportPayload::Areas(_) => "areas",
            ExportPayload::MissionDates(_) => "missiondates",
        }
    }

    pub fn to_csv(&self) -> PlumbResult<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            ExportPayload::Labels(table) => write_label_csv(table, &mut buf)?,
            ExportPayload::Areas(rows) => write_area_csv(rows, &mut buf)?,
            ExportPayload::MissionDates(entries) => write_mission_dates_csv(entries, &mut buf)?,
        }
        Ok(buf)
    }
}

/// One table export
#[derive(Debug, Clone)]
pub struct ExportJob {
    /// Deterministic job name: descriptive stem plus content digest
    pub name: String,
    pub file_name: String,
    pub payload: ExportPayload,
}

fn digest8(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .take(4)
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn mission_tag(mission: &str) -> String {
    code_from_mission(mission)
        .map(str::to_string)
        .unwrap_or_else(|| mission.to_string())
}

impl ExportJob {
    fn build(stem: String, file_name: String, payload: ExportPayload) -> PlumbResult<Self> {
        let bytes = payload.to_csv()?;
        Ok(Self {
            name: format!("{}_{}", stem, digest8(&bytes)),
            file_name,
            payload,
        })
    }

    /// Label table export for the mosaic key it was labeled on
    pub fn labels(
        initials: &str,
        key: &MosaicKey,
        table: LabelTable,
        export_date: NaiveDate,
    ) -> PlumbResult<Self> {
        let stem = format!(
            "labels_{}_{}_{}_aoi{}_{}",
            initials,
            mission_tag(&key.mission),
            key.date.format("%Y-%m-%d"),
            key.tile_id,
            table.legend_version
        );
        let file_name = export_filename(initials, &key.mission, key.date, export_date);
        Self::build(stem, file_name, ExportPayload::Labels(table))
    }

    /// Area-by-class table export
    pub fn areas(rows: Vec<AreaRow>, legend_version: &str, export_date: NaiveDate) -> PlumbResult<Self> {
        let missions: BTreeSet<String> = rows.iter().map(|r| mission_tag(&r.mission)).collect();
        let label = missions.into_iter().collect::<Vec<_>>().join("-");
        let stem = format!("areas_{}_{}", label, legend_version);
        let file_name = format!(
            "classArea_{}_{}_v{}.csv",
            label,
            legend_version,
            export_date.format("%Y-%m-%d")
        );
        Self::build(stem, file_name, ExportPayload::Areas(rows))
    }

    /// Mission-date list export
    pub fn mission_dates(entries: Vec<MissionDateEntry>, label: &str) -> PlumbResult<Self> {
        let stem = format!("missiondates_{}", label);
        let file_name = format!("{}_mission_date_list.csv", label);
        Self::build(stem, file_name, ExportPayload::MissionDates(entries))
    }
}

/// Handle returned by a sink on submission
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed(String),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed(_))
    }
}

/// External batch-export service
pub trait ExportSink: Send + Sync {
    fn submit(&self, job: &ExportJob) -> PlumbResult<JobId>;
    fn status(&self, id: &JobId) -> PlumbResult<JobStatus>;
}

/// Writes CSV files into a local directory. Jobs complete on submission.
pub struct LocalCsvSink {
    dir: PathBuf,
    jobs: Mutex<HashMap<JobId, JobStatus>>,
}

impl LocalCsvSink {
    pub fn new<P: AsRef<Path>>(dir: P) -> PlumbResult<Self> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            jobs: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_params(params: &ExportParams) -> PlumbResult<Self> {
        Self::new(params.resolve_output_dir()?)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock(&self) -> PlumbResult<std::sync::MutexGuard<'_, HashMap<JobId, JobStatus>>> {
        self.jobs
            .lock()
            .map_err(|e| PlumbError::Processing(format!("Export sink lock poisoned: {}", e)))
    }
}

impl ExportSink for LocalCsvSink {
    fn submit(&self, job: &ExportJob) -> PlumbResult<JobId> {
        let id = JobId(job.name.clone());
        if self.lock()?.contains_key(&id) {
            log::debug!("Job {} already submitted", id);
            return Ok(id);
        }

        let path = self.dir.join(&job.file_name);
        let status = match job.payload.to_csv().and_then(|bytes| fs::write(&path, bytes).map_err(PlumbError::from)) {
            Ok(()) => {
                log::info!("📄 Wrote {}", path.display());
                JobStatus::Done
            }
            Err(e) => {
                log::error!("Export {} failed: {}", job.name, e);
                JobStatus::Failed(e.to_string())
            }
        };
        self.lock()?.insert(id.clone(), status);
        Ok(id)
    }

    fn status(&self, id: &JobId) -> PlumbResult<JobStatus> {
        self.lock()?
            .get(id)
            .cloned()
            .ok_or_else(|| PlumbError::Processing(format!("Unknown export job {}", id)))
    }
}

/// Outcome of a queue run
#[derive(Debug, Default, Clone)]
pub struct ExportSummary {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub timed_out: Vec<String>,
}

impl ExportSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty() && self.timed_out.is_empty()
    }

    /// Per-job errors as library errors
    pub fn errors(&self) -> Vec<PlumbError> {
        self.failed
            .iter()
            .map(|(job, reason)| PlumbError::ExportJobFailed {
                job: job.clone(),
                reason: reason.clone(),
            })
            .chain(self.timed_out.iter().map(|job| PlumbError::ExportJobTimeout { job: job.clone() }))
            .collect()
    }
}

/// Bounded-concurrency export queue
pub struct ExportQueue {
    sink: Arc<dyn ExportSink>,
    params: ExportParams,
}

impl ExportQueue {
    pub fn new(sink: Arc<dyn ExportSink>, params: ExportParams) -> Self {
        Self { sink, params }
    }

    /// Submit every job and poll each to completion. Duplicate names in
    /// the batch are submitted once; no job failure aborts the run.
    pub async fn run(&self, jobs: Vec<ExportJob>) -> ExportSummary {
        let mut seen = BTreeSet::new();
        let jobs: Vec<ExportJob> = jobs.into_iter().filter(|j| seen.insert(j.name.clone())).collect();
        log::info!(
            "📤 Submitting {} export jobs (max {} concurrent)",
            jobs.len(),
            self.params.max_concurrent
        );

        let semaphore = Arc::new(Semaphore::new(self.params.max_concurrent.max(1)));
        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            let name = job.name.clone();
            let sink = Arc::clone(&self.sink);
            let semaphore = Arc::clone(&semaphore);
            let poll_interval = self.params.poll_interval();
            let timeout = self.params.timeout();
            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| PlumbError::Processing(format!("Export queue closed: {}", e)))?;
                run_job(sink, job, poll_interval, timeout).await
            });
            handles.push((name, handle));
        }

        let mut summary = ExportSummary::default();
        for (name, handle) in handles {
            match handle.await {
                Ok(Ok(())) => summary.succeeded.push(name),
                Ok(Err(PlumbError::ExportJobTimeout { job })) => {
                    log::error!("Export {} timed out", job);
                    summary.timed_out.push(job);
                }
                Ok(Err(e)) => {
                    log::error!("Export {} failed: {}", name, e);
                    let reason = match e {
                        PlumbError::ExportJobFailed { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    summary.failed.push((name, reason));
                }
                Err(e) => summary.failed.push((name, format!("Export task panicked: {}", e))),
            }
        }

        log::info!(
            "Export run finished: {} succeeded, {} failed, {} timed out",
            summary.succeeded.len(),
            summary.failed.len(),
            summary.timed_out.len()
        );
        summary
    }

    /// Run on an internal Tokio runtime for synchronous callers
    pub fn run_blocking(&self, jobs: Vec<ExportJob>) -> PlumbResult<ExportSummary> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_time()
            .build()
            .map_err(|e| PlumbError::Processing(format!("Failed to start export runtime: {}", e)))?;
        Ok(rt.block_on(self.run(jobs)))
    }
}

async fn blocking<T, F>(f: F) -> PlumbResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> PlumbResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PlumbError::Processing(format!("Export task failed: {}", e)))?
}

async fn run_job(
    sink: Arc<dyn ExportSink>,
    job: ExportJob,
    poll_interval: Duration,
    timeout: Duration,
) -> PlumbResult<()> {
    let name = job.name.clone();
    let started = Instant::now();

    let submit_sink = Arc::clone(&sink);
    let id = blocking(move || submit_sink.submit(&job))
        .await
        .map_err(|e| PlumbError::ExportJobFailed {
            job: name.clone(),
            reason: e.to_string(),
        })?;
    log::debug!("Submitted export {} as {}", name, id);

    loop {
        let poll_sink = Arc::clone(&sink);
        let poll_id = id.clone();
        let status = blocking(move || poll_sink.status(&poll_id))
            .await
            .map_err(|e| PlumbError::ExportJobFailed {
                job: name.clone(),
                reason: e.to_string(),
            })?;
        match status {
            JobStatus::Done => return Ok(()),
            JobStatus::Failed(reason) => return Err(PlumbError::ExportJobFailed { job: name, reason }),
            JobStatus::Pending | JobStatus::Running => {
                if started.elapsed() >= timeout {
                    return Err(PlumbError::ExportJobTimeout { job: name });
                }
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::labels::{ClassLegend, LabelStore};

    fn job(points: usize) -> ExportJob {
        let key = MosaicKey::new("LANDSAT_8", NaiveDate::from_ymd_opt(2022, 5, 5).unwrap(), 1);
        let mut store = LabelStore::new(ClassLegend::superior_3class());
        for i in 0..points {
            store.add("openWater", -90.0 - i as f64 * 0.01, 46.8, key.clone()).unwrap();
        }
        ExportJob::labels(
            "BGS",
            &key,
            store.snapshot().unwrap(),
            NaiveDate::from_ymd_opt(2023, 1, 9).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_job_names_are_deterministic() {
        assert_eq!(job(2).name, job(2).name);
        assert_ne!(job(2).name, job(3).name);
        assert!(job(2).name.starts_with("labels_BGS_LS8_2022-05-05_aoi1_superior-3class_"));
        assert_eq!(job(2).file_name, "eePlumB_BGS_LS8_2022-05-05_v2023-01-09.csv");
    }

    #[test]
    fn test_local_sink_resubmission() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LocalCsvSink::new(dir.path()).unwrap();
        let first = sink.submit(&job(2)).unwrap();
        let path = dir.path().join(job(2).file_name);
        fs::write(&path, "sentinel").unwrap();
        let second = sink.submit(&job(2)).unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::read_to_string(&path).unwrap(), "sentinel");
        assert_eq!(sink.status(&first).unwrap(), JobStatus::Done);
    }

    #[test]
    fn test_run_blocking_dedupes() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(LocalCsvSink::new(dir.path()).unwrap());
        let queue = ExportQueue::new(sink, ExportParams::default());
        let summary = queue.run_blocking(vec![job(1), job(1)]).unwrap();
        assert_eq!(summary.succeeded.len(), 1);
        assert!(summary.all_succeeded());
    }
}
