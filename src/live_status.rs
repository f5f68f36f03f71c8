use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::filters::FastSlamState;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub uptime_seconds: u64,
    // Input stream
    pub messages_received: u64,
    pub messages_rejected: u64,
    // Filter
    pub filter: FastSlamState,
}

impl LiveStatus {
    pub fn new(filter: FastSlamState) -> Self {
        Self {
            timestamp: current_timestamp(),
            uptime_seconds: 0,
            messages_received: 0,
            messages_rejected: 0,
            filter,
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
