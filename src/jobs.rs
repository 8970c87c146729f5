use crate::{
    models::{CreativeRequest, CreativeResponse},
    pipeline::Pipeline,
};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    statuses: Arc<Mutex<HashMap<Uuid, JobState>>>,
}

struct Job {
    id: Uuid,
    request: CreativeRequest,
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed { result: CreativeResponse },
    Failed { error: String, stage: Option<String> },
}

#[derive(Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    #[serde(flatten)]
    pub state: JobState,
}

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("job queue is full")]
    Full,
    #[error("job worker is not running")]
    Closed,
}

impl JobQueue {
    pub fn spawn(pipeline: Pipeline) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(queue_capacity_from_env());
        let statuses = Arc::new(Mutex::new(HashMap::new()));
        let statuses_bg = statuses.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                {
                    let mut guard = statuses_bg.lock().await;
                    guard.insert(job.id, JobState::Running);
                }

                let result = pipeline.run(job.request).await;
                let mut guard = statuses_bg.lock().await;
                match result {
                    Ok(resp) => {
                        info!(
                            target = "iris.jobs",
                            job_id = %job.id,
                            creative_id = %resp.creative_id,
                            "job_completed"
                        );
                        guard.insert(job.id, JobState::Completed { result: resp });
                    }
                    Err(err) => {
                        info!(
                            target = "iris.jobs",
                            job_id = %job.id,
                            stage = err.stage(),
                            "job_failed"
                        );
                        guard.insert(
                            job.id,
                            JobState::Failed {
                                error: err.detail().to_string(),
                                stage: Some(err.stage().to_string()),
                            },
                        );
                    }
                }
            }
        });

        (Self { tx, statuses }, handle)
    }

    pub async fn enqueue_creative(
        &self,
        request: CreativeRequest,
    ) -> Result<Uuid, EnqueueError> {
        let id = Uuid::new_v4();
        {
            let mut guard = self.statuses.lock().await;
            guard.insert(id, JobState::Queued);
        }
        let job = Job { id, request };
        match self.tx.try_send(job) {
            Ok(()) => Ok(id),
            Err(err) => {
                let mut guard = self.statuses.lock().await;
                guard.remove(&id);
                match err {
                    mpsc::error::TrySendError::Full(_) => Err(EnqueueError::Full),
                    mpsc::error::TrySendError::Closed(_) => Err(EnqueueError::Closed),
                }
            }
        }
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        let guard = self.statuses.lock().await;
        guard.get(&id).cloned().map(|state| JobInfo {
            id: id.to_string(),
            state,
        })
    }
}

fn queue_capacity_from_env() -> usize {
    std::env::var("QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(32)
}
