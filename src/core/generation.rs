//! Chat generation worker.
//!
//! Owns the runtime connection for chat turns; tasks arrive over a
//! channel and stream their chunks back over a per-task channel.

use crate::core::runtime::{ChatMessage, RuntimeClient};
use log::{error, info};
use tokio::sync::mpsc;
use tokio::time::Instant;

pub struct GenerationTask {
    model: String,
    messages: Vec<ChatMessage>,
    return_channel: mpsc::Sender<String>,
}

impl GenerationTask {
    pub fn new(
        model: String,
        messages: Vec<ChatMessage>,
    ) -> (GenerationTask, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel::<String>(1000);

        (
            GenerationTask {
                model,
                messages,
                return_channel: sender,
            },
            receiver,
        )
    }
}

pub async fn background_task(mut task_queue: mpsc::Receiver<GenerationTask>, runtime: RuntimeClient) {
    info!("generation worker ready, delegating chat turns to the runtime");

    loop {
        match task_queue.recv().await {
            None => {
                return;
            }
            Some(task) => {
                let started = Instant::now();

                match runtime
                    .chat_stream(&task.model, &task.messages, task.return_channel.clone())
                    .await
                {
                    Ok(()) => info!(
                        "generation with '{}' finished in {:.2}s",
                        task.model,
                        started.elapsed().as_secs_f32()
                    ),
                    Err(e) => {
                        error!("generation with '{}' failed: {e:#}", task.model);
                        crate::core::agent::report(format!("{e:#}"), Some(file!()), Some(line!()));
                    }
                }
            }
        }
    }
}
