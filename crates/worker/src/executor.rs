//! Executing one claimed job end to end.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::FutureExt;

use mayagen_core::naming::output_path;
use mayagen_core::provider::{ProviderError, RenderRequest};
use mayagen_db::models::job::{Job, JobOutcome};

use crate::providers::ProviderRegistry;

/// Renders jobs through the registered providers and writes the images
/// under the output root. Holds no store handle, so nothing is locked
/// while a provider call is in flight.
pub struct JobExecutor {
    providers: ProviderRegistry,
    output_dir: PathBuf,
    timeout: Duration,
}

impl JobExecutor {
    pub fn new(providers: ProviderRegistry, output_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            providers,
            output_dir,
            timeout,
        }
    }

    /// Run `job` and report how it ended. Never fails: every error, and a
    /// panic inside the provider, becomes [`JobOutcome::Failed`].
    pub async fn execute(&self, job: &Job) -> JobOutcome {
        match self.try_execute(job).await {
            Ok(path) => JobOutcome::Completed {
                output_path: path.to_string_lossy().into_owned(),
            },
            Err(e) => JobOutcome::Failed {
                error: e.to_string(),
            },
        }
    }

    async fn try_execute(&self, job: &Job) -> Result<PathBuf, ProviderError> {
        let provider = self
            .providers
            .get(&job.provider)
            .ok_or_else(|| ProviderError::Unsupported(job.provider.clone()))?;
        let request = RenderRequest {
            prompt: job.prompt.clone(),
            width: job.width,
            height: job.height,
            model: job.model.clone(),
        };

        let render = AssertUnwindSafe(provider.render(&request)).catch_unwind();
        let bytes = tokio::time::timeout(self.timeout, render)
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout))?
            .map_err(|panic| {
                let reason = panic_message(panic.as_ref());
                tracing::error!(job_id = job.id, provider = %job.provider, %reason, "Provider panicked");
                ProviderError::Rejected(format!("Provider panicked: {reason}"))
            })??;
        if bytes.is_empty() {
            return Err(ProviderError::MalformedResponse(
                "Provider returned an empty image".to_string(),
            ));
        }

        let path = output_path(&self.output_dir, &job.category, &job.filename);
        write_atomically(&path, &bytes).await?;
        Ok(path)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Write to a sibling temp file and rename, so a partial image is never
/// visible at `path`.
async fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut partial = path.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    tokio::fs::write(&partial, bytes).await?;
    if let Err(e) = tokio::fs::rename(&partial, path).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(e);
    }
    Ok(())
}
