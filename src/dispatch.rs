/// Batch dispatch of prompts to a responder.
///
/// `RateLimitedDispatcher` serves the hosted API: sequential batches, a fixed
/// retry budget per batch and a per-minute request throttle. A batch that runs
/// out of attempts gets empty responses so the output always lines up with the
/// input. `LocalDispatcher` serves the local model server: no retry and no
/// throttle, several batches in flight, errors abort the run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use tokio::task::JoinSet;

use crate::config::DispatchConfig;
use crate::responder::{Responder, ResponderError};

/// Lifecycle of one batch in the rate-limited dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Dispatched { attempt: u32 },
    Retry { attempt: u32 },
    Success,
    Exhausted,
}

/// Responses for every prompt plus how many batches were given up on.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub responses: Vec<String>,
    pub exhausted_batches: usize,
}

fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{pos}/{len}] {msg} [{elapsed_precise} / {eta_precise}]")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb
}

pub struct RateLimitedDispatcher {
    responder: Arc<dyn Responder>,
    batch_size: usize,
    max_attempts: u32,
    retry_delay: Duration,
    min_interval: Duration,
}

impl RateLimitedDispatcher {
    pub fn new(responder: Arc<dyn Responder>, batch_size: usize, config: &DispatchConfig) -> Self {
        let per_minute = config.rate_limit_per_minute.max(1);
        RateLimitedDispatcher {
            responder,
            batch_size: batch_size.max(1),
            max_attempts: config.max_attempts.max(1),
            retry_delay: Duration::from_secs(config.retry_delay_secs),
            min_interval: Duration::from_secs_f64(60.0 / per_minute as f64),
        }
    }

    /// Override the retry delay and the minimum spacing between batches.
    pub fn with_timing(mut self, retry_delay: Duration, min_interval: Duration) -> Self {
        self.retry_delay = retry_delay;
        self.min_interval = min_interval;
        self
    }

    pub async fn dispatch(&self, prompts: &[String]) -> DispatchOutcome {
        let batches: Vec<&[String]> = prompts.chunks(self.batch_size).collect();
        let mut responses = Vec::with_capacity(prompts.len());
        let mut exhausted_batches = 0;

        let pb = progress_bar(batches.len());
        pb.set_message(self.responder.model_name().to_string());
        let mut previous = Instant::now();

        for (index, batch) in batches.iter().enumerate() {
            let (state, batch_responses) = self.run_batch(index, batch).await;
            if state == BatchState::Exhausted {
                exhausted_batches += 1;
                responses.extend(std::iter::repeat(String::new()).take(batch.len()));
            } else {
                responses.extend(batch_responses);
            }
            pb.inc(1);

            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
            previous = Instant::now();
        }
        pb.finish_with_message("done");

        if exhausted_batches > 0 {
            tracing::warn!(exhausted_batches, "Some batches were skipped after too many failures");
        }
        DispatchOutcome { responses, exhausted_batches }
    }

    /// Drive one batch to `Success` or `Exhausted`.
    async fn run_batch(&self, index: usize, batch: &[String]) -> (BatchState, Vec<String>) {
        let mut state = BatchState::Pending;
        tracing::debug!(batch = index, ?state, size = batch.len());

        let mut attempt = 1;
        loop {
            state = BatchState::Dispatched { attempt };
            tracing::debug!(batch = index, ?state);

            let failure = match self.responder.respond(batch).await {
                Ok(responses) if responses.len() == batch.len() => {
                    tracing::debug!(batch = index, state = ?BatchState::Success);
                    return (BatchState::Success, responses);
                }
                Ok(responses) => ResponderError::Generation(format!(
                    "expected {} responses, got {}",
                    batch.len(),
                    responses.len()
                )),
                Err(e) => e,
            };

            tokio::time::sleep(self.retry_delay).await;
            if attempt >= self.max_attempts {
                tracing::warn!(batch = index, attempts = attempt, error = %failure, "Too many exceptions, skipping batch");
                return (BatchState::Exhausted, Vec::new());
            }

            state = BatchState::Retry { attempt };
            tracing::warn!(batch = index, ?state, error = %failure, "Exception encountered, retrying");
            attempt += 1;
        }
    }
}

pub struct LocalDispatcher {
    responder: Arc<dyn Responder>,
    batch_size: usize,
    workers: usize,
}

impl LocalDispatcher {
    pub fn new(responder: Arc<dyn Responder>, batch_size: usize, workers: usize) -> Self {
        LocalDispatcher {
            responder,
            batch_size: batch_size.max(1),
            workers: workers.max(1),
        }
    }

    /// Run up to `workers` batches at once and reassemble results in input order.
    pub async fn dispatch(&self, prompts: &[String]) -> Result<Vec<String>, ResponderError> {
        let batches: Vec<Vec<String>> = prompts.chunks(self.batch_size).map(<[String]>::to_vec).collect();
        let mut results: Vec<Option<Vec<String>>> = vec![None; batches.len()];

        let pb = progress_bar(batches.len());
        pb.set_message(self.responder.model_name().to_string());

        let mut pending = batches.into_iter().enumerate();
        let mut in_flight = JoinSet::new();
        loop {
            while in_flight.len() < self.workers {
                let Some((index, batch)) = pending.next() else {
                    break;
                };
                let responder = Arc::clone(&self.responder);
                in_flight.spawn(async move {
                    let result = responder.respond(&batch).await;
                    (index, batch.len(), result)
                });
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            let (index, expected, result) =
                joined.map_err(|e| ResponderError::Generation(format!("Dispatch task failed: {}", e)))?;
            let responses = result?;
            if responses.len() != expected {
                return Err(ResponderError::Generation(format!(
                    "Batch {} expected {} responses, got {}",
                    index,
                    expected,
                    responses.len()
                )));
            }
            results[index] = Some(responses);
            pb.inc(1);
        }
        pb.finish_with_message("done");

        Ok(results.into_iter().flatten().flatten().collect())
    }
}
