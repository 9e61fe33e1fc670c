use crate::catalog::CatalogOps;
use crate::error::HarvestError;
use futures_util::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use stac::Item;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::AsyncWriteExt;
use url::Url;

/// Fixed fan-out width for network-bound work, used both for source-link
/// resolution and for asset downloads. Independent of batch size.
pub const WORKER_POOL_SIZE: usize = 16;

/// One unit of download work: an asset key on an owning item, destined for a
/// directory. The filename is only known once redirects have resolved.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DownloadTask {
    item: Item,
    asset_key: String,
    dest_dir: PathBuf,
}

impl DownloadTask {
    pub fn new(item: &Item, asset_key: &str, dest_dir: &Path) -> Self {
        DownloadTask {
            item: item.clone(),
            asset_key: asset_key.to_string(),
            dest_dir: dest_dir.to_path_buf(),
        }
    }

    pub fn item_id(&self) -> &str {
        &self.item.id
    }

    pub fn asset_key(&self) -> &str {
        &self.asset_key
    }

    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    /// Runs this task to a terminal outcome. Missing asset keys and assets
    /// without a retrieval locator are skips; transport and write errors are
    /// failures. Neither touches sibling tasks.
    async fn run(&self, provider: &impl CatalogOps) -> TaskOutcome {
        let Some(asset) = self.item.assets.get(&self.asset_key) else {
            return TaskOutcome::Skipped {
                reason: "asset key not found".to_string(),
            };
        };
        if asset.href.is_empty() {
            return TaskOutcome::Skipped {
                reason: "no retrievable location".to_string(),
            };
        }
        let response = match provider.fetch(&asset.href).await {
            Ok(response) => response,
            Err(err) => {
                return TaskOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        };
        // Name the file after the final resolved URL, not the href we asked
        // for; redirects often land on a concrete object path.
        let file_name =
            file_name_from_url(response.url()).unwrap_or_else(|| self.asset_key.clone());
        let dest = self.dest_dir.join(file_name);
        match stream_to_file(response, &dest).await {
            Ok(byte_count) => TaskOutcome::Success {
                path: dest,
                byte_count,
            },
            Err(err) => TaskOutcome::Failed {
                reason: err.to_string(),
            },
        }
    }
}

fn file_name_from_url(url: &Url) -> Option<String> {
    url.path_segments()
        .and_then(|segments| segments.last())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// Streams a response body to a file chunk by chunk, fully overwriting any
/// existing file at `dest`. Returns the number of bytes written.
pub(crate) async fn stream_to_file(
    response: reqwest::Response,
    dest: &Path,
) -> Result<u64, HarvestError> {
    let mut file = tokio::fs::File::create(dest).await?;
    let mut body = response.bytes_stream();
    let mut byte_count = 0_u64;
    while let Some(bytes) = body.try_next().await? {
        byte_count += bytes.len() as u64;
        file.write_all(&bytes).await?;
    }
    file.flush().await?;
    Ok(byte_count)
}

#[derive(Debug)]
pub enum TaskOutcome {
    Success { path: PathBuf, byte_count: u64 },
    Skipped { reason: String },
    Failed { reason: String },
}

#[derive(Debug)]
pub struct TaskReport {
    pub item_id: String,
    pub asset_key: String,
    pub outcome: TaskOutcome,
}

/// Terminal outcomes for every task of an executed batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub reports: Vec<TaskReport>,
}

impl BatchReport {
    pub fn completed(&self) -> usize {
        self.reports.len()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|outcome| matches!(outcome, TaskOutcome::Success { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, TaskOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, TaskOutcome::Failed { .. }))
    }

    pub fn bytes_written(&self) -> u64 {
        self.reports
            .iter()
            .map(|report| match &report.outcome {
                TaskOutcome::Success { byte_count, .. } => *byte_count,
                _ => 0,
            })
            .sum()
    }

    fn count(&self, predicate: impl Fn(&TaskOutcome) -> bool) -> usize {
        self.reports
            .iter()
            .filter(|report| predicate(&report.outcome))
            .count()
    }
}

#[derive(Deserialize, Serialize, Debug)]
pub struct DownloadPlan {
    tasks: Vec<DownloadTask>,
}

impl DownloadPlan {
    pub fn new(tasks: Vec<DownloadTask>) -> Self {
        Self { tasks }
    }

    pub fn tasks(&self) -> &[DownloadTask] {
        &self.tasks
    }

    pub fn read<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let plan: Self = serde_json::from_str(&content)?;
        Ok(plan)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Executes every task on a bounded worker pool and reports once all of
    /// them have reached a terminal outcome. Individual failures never abort
    /// the batch.
    pub async fn execute(&self, provider: &impl CatalogOps) -> BatchReport {
        let total = self.tasks.len();
        let completed = AtomicUsize::new(0);
        let reports = futures_util::stream::iter(self.tasks.iter())
            .map(|task| {
                let completed = &completed;
                async move {
                    let outcome = task.run(provider).await;
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    match &outcome {
                        TaskOutcome::Success { path, byte_count } => tracing::info!(
                            done,
                            total,
                            item = %task.item_id(),
                            asset = %task.asset_key(),
                            path = %path.display(),
                            bytes = byte_count,
                            "downloaded"
                        ),
                        TaskOutcome::Skipped { reason } => tracing::warn!(
                            done,
                            total,
                            item = %task.item_id(),
                            asset = %task.asset_key(),
                            reason = %reason,
                            "skipped"
                        ),
                        TaskOutcome::Failed { reason } => tracing::error!(
                            done,
                            total,
                            item = %task.item_id(),
                            asset = %task.asset_key(),
                            reason = %reason,
                            "download failed"
                        ),
                    }
                    TaskReport {
                        item_id: task.item_id().to_string(),
                        asset_key: task.asset_key().to_string(),
                        outcome,
                    }
                }
            })
            .buffer_unordered(WORKER_POOL_SIZE)
            .collect::<Vec<_>>()
            .await;
        BatchReport { reports }
    }
}
