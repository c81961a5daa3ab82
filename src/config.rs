use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use crate::prelude::*;
use crate::task::Priority;

const DEFAULT_STORAGE_PATH: &str = "/app/storage";
const DEFAULT_BATCH_SIZE: usize = 2000;
const DEFAULT_PREFETCH_COUNT: u16 = 1;
const DEFAULT_DB_HOST: &str = "127.0.0.1";
const DEFAULT_DB_PORT: u16 = 3306;
const DEFAULT_DB_NAME: &str = "import";
const DEFAULT_DB_USER: &str = "root";

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
}

/// Process tunables, read once at startup. Everything comes from the
/// environment; `.env` is folded in by `main` before this runs.
#[derive(Debug, Clone)]
pub struct Config {
    pub amqp_url: String,
    pub queues: Vec<String>,
    pub batch_size: usize,
    pub prefetch_count: u16,
    pub storage_path: PathBuf,
    pub db: DbConfig,
}

impl Config {
    pub fn from_env() -> Result<Config> {
        let amqp_url = env::var("RABBITMQ_URL")
            .map_err(|_| ImportError::Config("RABBITMQ_URL is not set".into()))?;

        let queues = match env::var("WORKER_QUEUES") {
            Ok(raw) => {
                let parsed = parse_queues(&raw);
                if parsed.is_empty() {
                    default_queues()
                } else {
                    parsed
                }
            }
            Err(_) => default_queues(),
        };

        let batch_size = parse_env("WORKER_BATCH_SIZE", DEFAULT_BATCH_SIZE)?;
        if batch_size == 0 {
            return Err(ImportError::Config("WORKER_BATCH_SIZE must be at least 1".into()));
        }

        Ok(Config {
            amqp_url,
            queues,
            batch_size,
            prefetch_count: parse_env("WORKER_PREFETCH_COUNT", DEFAULT_PREFETCH_COUNT)?,
            storage_path: PathBuf::from(
                env::var("STORAGE_PATH").unwrap_or_else(|_| DEFAULT_STORAGE_PATH.into()),
            ),
            db: DbConfig {
                host: env::var("DB_HOST").unwrap_or_else(|_| DEFAULT_DB_HOST.into()),
                port: parse_env("DB_PORT", DEFAULT_DB_PORT)?,
                name: env::var("DB_NAME").unwrap_or_else(|_| DEFAULT_DB_NAME.into()),
                user: env::var("DB_USER").unwrap_or_else(|_| DEFAULT_DB_USER.into()),
                password: env::var("DB_PASSWORD").unwrap_or_default(),
            },
        })
    }
}

fn default_queues() -> Vec<String> {
    Priority::ALL.iter().map(|p| p.queue_name().to_string()).collect()
}

fn parse_queues(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|queue| !queue.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|err| ImportError::Config(format!("{}: {}", key, err))),
        Err(_) => Ok(default),
    }
}
