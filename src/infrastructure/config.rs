//! Application configuration gathered from the environment.

use di::inject;
use di::injectable;
use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Base address of the Ollama-compatible inference runtime.
    pub runtime_host: String,
    pub models_dir: String,
    pub datasets_dir: String,
    /// Command line (split shell-style) the training worker launches per job.
    pub trainer_command: String,
}

#[injectable]
impl AppConfig {
    #[inject]
    pub fn from_env() -> AppConfig {
        dotenvy::dotenv().ok();

        AppConfig {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_owned()),
            runtime_host: env::var("RUNTIME_HOST")
                .unwrap_or_else(|_| "http://localhost:11434".to_owned()),
            models_dir: env::var("MODELS_DIR").unwrap_or_else(|_| "models".to_owned()),
            datasets_dir: env::var("DATASETS_DIR").unwrap_or_else(|_| "datasets".to_owned()),
            trainer_command: env::var("TRAINER_COMMAND")
                .unwrap_or_else(|_| "python3 scripts/finetune.py".to_owned()),
        }
    }
}
