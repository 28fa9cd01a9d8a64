//! Configuration for concordd

use clap::Parser;
use concord_core::hash::SigningKey;
use std::path::PathBuf;

/// concordd - Concord DTU Substrate Daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "concordd")]
#[command(about = "Concord knowledge substrate daemon")]
pub struct Config {
    /// Data directory for persistent storage
    #[arg(short, long, default_value = "./data/concordd")]
    pub data_dir: PathBuf,

    /// Hex-encoded 32-byte envelope signing seed (random if omitted)
    #[arg(long, env = "CONCORD_SIGNING_SEED")]
    pub signing_seed: Option<String>,

    /// Seconds without a heartbeat before a CRI is marked offline
    #[arg(long, default_value = "300")]
    pub heartbeat_threshold_secs: u64,

    /// Heartbeat sweep interval in seconds
    #[arg(long, default_value = "60")]
    pub heartbeat_sweep_secs: u64,

    /// News compaction interval in seconds
    #[arg(long, default_value = "3600")]
    pub compaction_interval_secs: u64,

    /// Event DTUs older than this fold into daily Megas
    #[arg(long, default_value = "24")]
    pub daily_age_hours: i64,

    /// Megas older than this fold into weekly Hypers
    #[arg(long, default_value = "7")]
    pub weekly_age_days: i64,

    /// Minimum (day, domain) cluster size worth aggregating
    #[arg(long, default_value = "3")]
    pub min_cluster_size: usize,

    /// Wall-clock hour (UTC, 0-23) of the nightly compliance audit
    #[arg(long, default_value = "3")]
    pub audit_hour: u32,

    /// Rate-window purge interval in seconds
    #[arg(long, default_value = "600")]
    pub purge_interval_secs: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.audit_hour > 23 {
            anyhow::bail!("audit hour must be 0-23");
        }
        if self.min_cluster_size < 2 {
            anyhow::bail!("minimum cluster size must be at least 2");
        }
        if let Some(seed) = &self.signing_seed {
            if hex::decode(seed).map(|b| b.len() != 32).unwrap_or(true) {
                anyhow::bail!("signing seed must be 64 hex chars (32 bytes)");
            }
        }
        Ok(())
    }

    /// Resolve the envelope signing key from the seed, or generate one.
    pub fn signing_key(&self) -> SigningKey {
        match &self.signing_seed {
            Some(seed) => {
                let bytes = hex::decode(seed).expect("validated seed");
                let mut raw = [0u8; 32];
                raw.copy_from_slice(&bytes);
                SigningKey::from_seed(raw)
            }
            None => SigningKey::generate(),
        }
    }
}
