use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use delve_core::event::EventBus;
use delve_core::types::WorkflowEvent;

/// JSONL run logger.
///
/// Subscribes to the EventBus and appends one JSON object per event to
/// `{log_dir}/{run_id}/{timestamp}.jsonl`. Lines are flushed as they are
/// written, so a crash mid-run loses nothing already logged.
pub struct RunLogger {
    log_dir: PathBuf,
    level: u8,
}

#[derive(Serialize)]
struct LogEntry {
    timestamp: String,
    run_id: String,
    event_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

impl RunLogger {
    /// `level` controls verbosity: 1 = run summary, 2 = per step,
    /// 3 = per step with the state delta.
    pub fn new(log_dir: PathBuf, level: u8) -> Self {
        Self { log_dir, level }
    }

    /// Log every run on the bus until cancelled or every publisher is gone.
    pub async fn run(self, event_bus: Arc<EventBus>, cancel: CancellationToken) {
        let mut rx = event_bus.subscribe();
        drop(event_bus);
        let mut writers: HashMap<String, BufWriter<File>> = HashMap::new();

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("RunLogger cancelled");
                    break;
                }
                result = rx.recv() => match result {
                    Ok(event) => event,
                    Err(RecvError::Lagged(n)) => {
                        debug!(skipped = n, "RunLogger lagged, skipped events");
                        continue;
                    }
                    Err(RecvError::Closed) => {
                        debug!("EventBus closed, RunLogger stopping");
                        break;
                    }
                },
            };

            let run_id = event.run_id().0.clone();
            if matches!(event, WorkflowEvent::RunStarted { .. }) {
                match open_log(&self.log_dir, &run_id).await {
                    Ok((path, writer)) => {
                        info!(path = %path.display(), "Run log opened");
                        writers.insert(run_id.clone(), writer);
                    }
                    Err(e) => error!(error = %e, run_id = %run_id, "Failed to open run log"),
                }
            }

            if let (Some(entry), Some(writer)) =
                (self.event_to_entry(&event), writers.get_mut(&run_id))
            {
                if let Err(e) = write_entry(writer, &entry).await {
                    error!(error = %e, run_id = %run_id, "Failed to write run log entry");
                    writers.remove(&run_id);
                }
            }

            if matches!(event, WorkflowEvent::RunFinished { .. }) {
                if let Some(mut writer) = writers.remove(&run_id) {
                    writer.flush().await.ok();
                }
            }
        }

        for (_, mut writer) in writers {
            writer.flush().await.ok();
        }
    }

    /// Convert an event to a log entry, or `None` if filtered out by level.
    fn event_to_entry(&self, event: &WorkflowEvent) -> Option<LogEntry> {
        let entry = |event_type, step: Option<&String>, detail| LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            run_id: event.run_id().0.clone(),
            event_type,
            step: step.cloned(),
            detail,
        };

        match event {
            // L1: run summary
            WorkflowEvent::RunStarted {
                question, pdf_path, ..
            } => Some(entry(
                "run_started",
                None,
                Some(serde_json::json!({ "question": question, "pdf_path": pdf_path })),
            )),
            WorkflowEvent::RunFinished {
                outcome,
                steps_executed,
                ..
            } => Some(entry(
                "run_finished",
                None,
                Some(serde_json::json!({
                    "outcome": outcome,
                    "steps_executed": steps_executed,
                })),
            )),
            WorkflowEvent::StepFailed { step, error, .. } => Some(entry(
                "step_failed",
                Some(step),
                Some(serde_json::json!({ "error": error })),
            )),

            // L2: per step
            WorkflowEvent::StepStarted { step, index, .. } if self.level >= 2 => Some(entry(
                "step_started",
                Some(step),
                Some(serde_json::json!({ "index": index })),
            )),
            WorkflowEvent::StepCompleted {
                step,
                index,
                slot,
                delta,
                elapsed_ms,
                ..
            } if self.level >= 2 => {
                let mut detail = serde_json::json!({
                    "index": index,
                    "slot": slot,
                    "elapsed_ms": elapsed_ms,
                });
                // L3: with the state delta
                if self.level >= 3 {
                    detail["delta"] = delta.clone();
                }
                Some(entry("step_completed", Some(step), Some(detail)))
            }
            WorkflowEvent::StepRetry {
                step,
                attempt,
                error,
                ..
            } if self.level >= 2 => Some(entry(
                "step_retry",
                Some(step),
                Some(serde_json::json!({ "attempt": attempt, "error": error })),
            )),
            WorkflowEvent::RouteChosen {
                next_step, reason, ..
            } if self.level >= 2 => Some(entry(
                "route_chosen",
                None,
                Some(serde_json::json!({ "next_step": next_step, "reason": reason })),
            )),

            _ => None,
        }
    }
}

async fn open_log(log_dir: &Path, run_id: &str) -> std::io::Result<(PathBuf, BufWriter<File>)> {
    let run_dir = log_dir.join(run_id);
    tokio::fs::create_dir_all(&run_dir).await?;

    let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
    let path = run_dir.join(format!("{}.jsonl", timestamp));
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;
    Ok((path, BufWriter::new(file)))
}

async fn write_entry(writer: &mut BufWriter<File>, entry: &LogEntry) -> std::io::Result<()> {
    let mut line = serde_json::to_string(entry)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}
