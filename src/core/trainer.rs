//! Training worker.
//!
//! Fine-tuning is delegated to an external trainer process; this worker
//! owns the job state machine around it. Jobs arrive as ids over a
//! channel, run one at a time, and move `pending -> running ->
//! {completed, failed}` with no retries.

use crate::infrastructure::config::AppConfig;
use crate::infrastructure::entities::{MetricRecord, TrainingJob};
use crate::infrastructure::repositories::{
    DbDatasetRepository, DbModelRepository, DbTrainingJobRepository,
};
use crate::infrastructure::traits::{DatasetRepository, ModelRepository, TrainingJobRepository};
use anyhow::{Context, Result, anyhow, bail};
use log::{error, info, warn};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use uuid::Uuid;

pub async fn background_task(
    mut job_queue: mpsc::Receiver<Uuid>,
    jobs: DbTrainingJobRepository,
    models: DbModelRepository,
    datasets: DbDatasetRepository,
    config: AppConfig,
) {
    info!("training worker ready (trainer: {})", config.trainer_command);

    loop {
        match job_queue.recv().await {
            None => {
                return;
            }
            Some(job_id) => {
                if let Err(e) = run_job(&jobs, &models, &datasets, &config, job_id).await {
                    error!("training job {job_id} bookkeeping failed: {e:#}");
                }
            }
        }
    }
}

/// Runs one job to completion. Errors returned here are bookkeeping
/// failures (the database went away); trainer failures are recorded on
/// the job row instead.
async fn run_job(
    jobs: &DbTrainingJobRepository,
    models: &DbModelRepository,
    datasets: &DbDatasetRepository,
    config: &AppConfig,
    job_id: Uuid,
) -> Result<()> {
    let Some(job) = jobs.find_by_id(job_id).await? else {
        warn!("training job {job_id} disappeared before it could run");
        return Ok(());
    };

    if jobs.set_running(job_id).await? == 0 {
        warn!("training job {job_id} is not pending, skipping");
        return Ok(());
    }

    info!("starting training for job {job_id}");

    match train(jobs, models, datasets, config, &job).await {
        Ok(output_dir) => {
            jobs.complete_job(
                job_id,
                &format!("Training finished successfully. Model saved to {output_dir}\n"),
            )
            .await?;
            info!("training job {job_id} completed");
        }
        Err(e) => {
            error!("training job {job_id} failed: {e:#}");
            jobs.fail_job(job_id, &format!("{e:#}")).await?;
            crate::core::agent::report(format!("{e:#}"), Some(file!()), Some(line!()));
        }
    }

    Ok(())
}

async fn train(
    jobs: &DbTrainingJobRepository,
    models: &DbModelRepository,
    datasets: &DbDatasetRepository,
    config: &AppConfig,
    job: &TrainingJob,
) -> Result<String> {
    let model = models
        .find_by_id(job.model_id)
        .await?
        .ok_or_else(|| anyhow!("base model row missing"))?;
    let model_path = model
        .path
        .ok_or_else(|| anyhow!("base model '{}' has no local path", model.name))?;
    let dataset = datasets
        .find_by_id(job.dataset_id)
        .await?
        .ok_or_else(|| anyhow!("dataset row missing"))?;
    let eval_path = match job.eval_dataset_id {
        Some(id) => Some(
            datasets
                .find_by_id(id)
                .await?
                .ok_or_else(|| anyhow!("eval dataset row missing"))?
                .path,
        ),
        None => None,
    };

    let output_dir = format!("{}/{}_finetuned_job_{}", config.models_dir, model.name, job.id);

    let argv = shell_words::split(&config.trainer_command).context("invalid TRAINER_COMMAND")?;
    let (program, base_args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("TRAINER_COMMAND is empty"))?;

    let mut command = Command::new(program);
    command
        .args(base_args)
        .arg("--model")
        .arg(&model_path)
        .arg("--dataset")
        .arg(&dataset.path)
        .arg("--epochs")
        .arg(job.epochs.to_string())
        .arg("--batch-size")
        .arg(job.batch_size.to_string())
        .arg("--output")
        .arg(&output_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(eval) = &eval_path {
        command.arg("--eval-dataset").arg(eval);
    }

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to launch trainer '{program}'"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("trainer stdout not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("trainer stderr not captured"))?;

    // Drain stderr concurrently so the child can't block on a full pipe.
    let stderr_task = tokio::spawn(async move {
        let mut collected = String::new();
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            collected.push_str(&line);
            collected.push('\n');
        }
        collected
    });

    // The trainer's stdout is the metrics callback surface: one JSON
    // object per logging interval, plain text otherwise.
    let mut lines = BufReader::new(stdout).lines();
    while let Some(line) = lines
        .next_line()
        .await
        .context("failed to read trainer output")?
    {
        match parse_metric_line(&line) {
            Some(record) => jobs.append_metric(job.id, record, &line).await?,
            None => jobs.append_logs(job.id, &line).await?,
        }
    }

    let status = child.wait().await.context("failed to wait for trainer")?;
    let stderr_text = stderr_task.await.unwrap_or_default();

    if status.success() {
        Ok(output_dir)
    } else {
        bail!("trainer exited with {status}: {}", stderr_text.trim());
    }
}

fn parse_metric_line(line: &str) -> Option<MetricRecord> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}
