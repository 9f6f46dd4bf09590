//! Persistence for merge tasks and credit balances.
//!
//! Two backends are provided: an in-process store for development and
//! tests, and Redis for shared deployments. Both guarantee that a task
//! leaves `processing` at most once and that a debit never takes a
//! balance below zero.

pub mod config;
pub mod credits;
pub mod error;
pub mod redis_store;
pub mod tasks;

use std::sync::Arc;

use tracing::info;

pub use config::{StoreBackend, StoreConfig};
pub use credits::{CreditLedger, DebitOutcome, MemoryCreditLedger};
pub use error::{StoreError, StoreResult};
pub use redis_store::{RedisCreditLedger, RedisTaskRepository};
pub use tasks::{MemoryTaskRepository, TaskRepository};

/// Task repository and credit ledger sharing one backend.
#[derive(Clone)]
pub struct Stores {
    pub tasks: Arc<dyn TaskRepository>,
    pub credits: Arc<dyn CreditLedger>,
}

impl Stores {
    /// In-process stores.
    pub fn in_memory() -> Self {
        Self {
            tasks: Arc::new(MemoryTaskRepository::new()),
            credits: Arc::new(MemoryCreditLedger::new()),
        }
    }

    /// Open the backend selected by `config`.
    pub fn connect(config: &StoreConfig) -> StoreResult<Self> {
        match config.backend {
            StoreBackend::Memory => {
                info!("Using in-memory task and credit store");
                Ok(Self::in_memory())
            }
            StoreBackend::Redis => {
                let client = redis::Client::open(config.redis_url.as_str())?;
                info!(prefix = %config.key_prefix, "Using Redis task and credit store");
                Ok(Self {
                    tasks: Arc::new(RedisTaskRepository::new(client.clone(), &config.key_prefix)),
                    credits: Arc::new(RedisCreditLedger::new(client, &config.key_prefix)),
                })
            }
        }
    }

    /// Open the backend selected by the environment.
    pub fn from_env() -> StoreResult<Self> {
        Self::connect(&StoreConfig::from_env())
    }
}
