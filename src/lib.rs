//! Self-hosted LLM studio backend - library exports for testing
//!
//! (c) Softlandia 2025

pub mod api;
pub mod core;
pub mod infrastructure;

use crate::core::agent::ErrorReport;
use crate::core::generation::GenerationTask;
use tokio::sync::OnceCell;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Chat turns for the generation worker.
pub static GENERATION_SENDER: OnceCell<mpsc::Sender<GenerationTask>> = OnceCell::const_new();

/// Accepted training job ids for the training worker.
pub static JOB_SENDER: OnceCell<mpsc::Sender<Uuid>> = OnceCell::const_new();

/// Internal error reports for the code health agent.
pub static ERROR_SINK: OnceCell<mpsc::Sender<ErrorReport>> = OnceCell::const_new();
