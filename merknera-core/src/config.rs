//! Tunables for the orchestration pipeline. `merknera-server::main` owns
//! the `clap` CLI that produces one of these; library code only ever sees
//! the resolved struct.

use std::time::Duration;

use crate::dispatch::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKER_POOL_SIZE};
use crate::rpc::{DEFAULT_CALL_TIMEOUT, DEFAULT_PING_TIMEOUT};

/// Resolved runtime configuration for one server process.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub worker_pool_size: usize,
    pub move_queue_capacity: usize,
    pub ping_timeout: Duration,
    pub call_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            move_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}
