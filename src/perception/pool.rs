//! Per-modality worker pool
//!
//! A fixed number of workers drain a bounded job queue, so at most
//! `workers_per_modality` calls are in flight against one service and the
//! producer blocks once `queue_capacity` chunks are waiting.

use crate::config::PerceptionConfig;
use crate::error::EvaluationError;
use crate::perception::{MediaChunk, PerceptionAdapter};
use crate::types::{Modality, Observation};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

type Job = (usize, MediaChunk);

/// Bounded pool of perception calls for one modality
pub struct ModalityPool {
    adapter: Arc<PerceptionAdapter>,
    modality: Modality,
    workers: usize,
    queue_capacity: usize,
}

impl ModalityPool {
    pub fn new(adapter: Arc<PerceptionAdapter>, modality: Modality, config: &PerceptionConfig) -> Self {
        Self {
            adapter,
            modality,
            workers: config.workers_per_modality.max(1),
            queue_capacity: config.queue_capacity.max(1),
        }
    }

    /// Measure every chunk and return observations in chunk order.
    ///
    /// A fatal perception error cancels `cancel`, which stops the other
    /// modality pools of the same session as well.
    pub async fn run(
        self,
        chunks: Vec<MediaChunk>,
        cancel: CancellationToken,
    ) -> Result<Vec<Observation>, EvaluationError> {
        let modality = self.modality;
        let total = chunks.len();
        let (job_tx, job_rx) = mpsc::channel::<Job>(self.queue_capacity);
        let job_rx = Arc::new(Mutex::new(job_rx));

        let mut workers = JoinSet::new();
        for _ in 0..self.workers {
            let job_rx = Arc::clone(&job_rx);
            let adapter = Arc::clone(&self.adapter);
            let cancel = cancel.clone();

            workers.spawn(async move {
                let mut measured = Vec::new();
                loop {
                    let job = {
                        let mut rx = job_rx.lock().await;
                        tokio::select! {
                            _ = cancel.cancelled() => None,
                            job = rx.recv() => job,
                        }
                    };
                    let Some((index, chunk)) = job else {
                        break;
                    };

                    let result = tokio::select! {
                        _ = cancel.cancelled() => return Err(EvaluationError::Cancelled),
                        result = adapter.measure(&chunk, modality) => result,
                    };

                    match result {
                        Ok(measurement) => measured.push((
                            index,
                            Observation {
                                modality,
                                timestamp_sec: chunk.midpoint_sec(),
                                measurement,
                            },
                        )),
                        Err(e) => {
                            cancel.cancel();
                            return Err(e);
                        }
                    }
                }
                Ok(measured)
            });
        }
        // Workers own the receiver from here on; if they all exit, sends fail fast.
        drop(job_rx);

        for job in chunks.into_iter().enumerate() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                sent = job_tx.send(job) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        drop(job_tx);

        let mut measured = Vec::with_capacity(total);
        let mut failure: Option<EvaluationError> = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(batch)) => measured.extend(batch),
                Ok(Err(EvaluationError::Cancelled)) => {}
                Ok(Err(e)) => {
                    failure.get_or_insert(e);
                }
                Err(join_error) => {
                    cancel.cancel();
                    failure.get_or_insert(EvaluationError::PerceptionUnavailable {
                        modality,
                        reason: format!("worker failed: {}", join_error),
                    });
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        if cancel.is_cancelled() {
            return Err(EvaluationError::Cancelled);
        }

        measured.sort_by_key(|(index, _)| *index);
        debug!(%modality, chunks = total, "modality stream complete");
        Ok(measured.into_iter().map(|(_, obs)| obs).collect())
    }
}
