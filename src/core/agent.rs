//! Code health agent.
//!
//! Internal errors are reported into a sink channel; this worker stores
//! them and asks a local model for an explanation and a proposed fix.

use crate::core::runtime::RuntimeClient;
use crate::infrastructure::entities::{CapturedError, ErrorStatus};
use crate::infrastructure::repositories::{DbErrorRepository, DbModelRepository};
use crate::infrastructure::traits::{ErrorRepository, ModelRepository};
use anyhow::{Result, anyhow};
use chrono::Utc;
use log::{error, info, warn};
use minijinja::context;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug)]
pub struct ErrorReport {
    pub traceback: String,
    pub file_path: Option<String>,
    pub line_number: Option<i64>,
}

/// Hands an internal error to the agent worker. Drops the report when the
/// sink is not installed (tests) or full.
pub fn report(traceback: String, file_path: Option<&str>, line_number: Option<u32>) {
    let Some(sink) = crate::ERROR_SINK.get() else {
        return;
    };

    let report = ErrorReport {
        traceback,
        file_path: file_path.map(str::to_owned),
        line_number: line_number.map(i64::from),
    };

    if sink.try_send(report).is_err() {
        warn!("error sink full, dropping captured error");
    }
}

const DIAGNOSIS_TEMPLATE: &str = r#"You are an expert engineer debugging a self-hosted model dashboard backend.
An error was captured. Your task is to analyze the error and provide a fix.

ERROR:
{{ traceback }}

{% if source %}
FULL SOURCE CODE of {{ file_path }}:
```
{{ source }}
```
{% endif %}

INSTRUCTIONS:
1. First, provide a brief, clear EXPLANATION of the root cause of the error.
2. Second, provide a PROPOSED_FIX in a git-style diff format. The diff should only contain the changes needed to fix the bug.

Start your response with "EXPLANATION:" and then on a new line "PROPOSED_FIX:".
"#;

pub async fn background_task(
    mut reports: mpsc::Receiver<ErrorReport>,
    errors: DbErrorRepository,
    models: DbModelRepository,
    runtime: RuntimeClient,
) {
    let mut prompts = minijinja::Environment::new();
    prompts.set_trim_blocks(true);
    prompts
        .add_template("diagnosis", DIAGNOSIS_TEMPLATE)
        .expect("diagnosis template must parse");

    loop {
        match reports.recv().await {
            None => {
                return;
            }
            Some(report) => {
                let row = CapturedError {
                    id: Uuid::new_v4(),
                    traceback: report.traceback,
                    file_path: report.file_path,
                    line_number: report.line_number,
                    analysis: None,
                    proposed_fix: None,
                    status: ErrorStatus::New,
                    created_at: Utc::now(),
                };

                let stored = match errors.insert_error(row).await {
                    Ok(stored) => stored,
                    Err(e) => {
                        error!("AGENT: failed to store captured error: {e}");
                        continue;
                    }
                };

                info!("AGENT: starting analysis for error {}", stored.id);

                if let Err(e) = analyze(&errors, &models, &runtime, &prompts, stored.id).await {
                    error!("AGENT: analysis of {} failed: {e:#}", stored.id);
                    let failure = format!("Failed to complete analysis.\n\n{e:#}");
                    if let Err(e) = errors.set_analysis_failed(stored.id, &failure).await {
                        error!("AGENT: could not record analysis failure: {e}");
                    }
                }
            }
        }
    }
}

async fn analyze(
    errors: &DbErrorRepository,
    models: &DbModelRepository,
    runtime: &RuntimeClient,
    prompts: &minijinja::Environment<'_>,
    error_id: Uuid,
) -> Result<()> {
    errors.set_status(error_id, ErrorStatus::Analyzing).await?;
    let Some(captured) = errors.find_by_id(error_id).await? else {
        return Ok(());
    };

    // Best effort: the source is only on disk in dev deployments.
    let source = match &captured.file_path {
        Some(path) => tokio::fs::read_to_string(path).await.ok(),
        None => None,
    };

    let model = models
        .first_ready()
        .await?
        .ok_or_else(|| anyhow!("no local models available for analysis"))?;
    info!("AGENT: using model '{}' for analysis", model.name);

    let prompt = prompts.get_template("diagnosis")?.render(context! {
        traceback => captured.traceback,
        file_path => captured.file_path,
        source => source,
    })?;

    let response = runtime.generate(&model.source_id, &prompt).await?;
    let (explanation, proposed_fix) = split_analysis(&response);
    errors.set_analysis(error_id, &explanation, &proposed_fix).await?;

    info!("AGENT: analysis complete for error {error_id}");
    Ok(())
}

fn split_analysis(response: &str) -> (String, String) {
    if let Some((explanation, fix)) = response.split_once("PROPOSED_FIX:") {
        (
            explanation.replace("EXPLANATION:", "").trim().to_owned(),
            fix.trim().to_owned(),
        )
    } else if response.contains("EXPLANATION:") {
        (
            response.replace("EXPLANATION:", "").trim().to_owned(),
            "Could not parse proposed fix.".to_owned(),
        )
    } else {
        (
            "Could not parse explanation.".to_owned(),
            "Could not parse proposed fix.".to_owned(),
        )
    }
}
