//! Best-effort server health metrics.
//!
//! Each metric is gathered independently; a failed probe is omitted from
//! the struct but never poisons the others.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use serde::Serialize;

use crate::fsutil;

use super::{ServerConfig, rig_sql_csv};

/// Resource monitoring data for the server.
#[derive(Debug, Clone, Serialize)]
pub struct HealthMetrics {
    /// Active connections from information_schema.PROCESSLIST. None when
    /// the query failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connections: Option<u32>,
    pub max_connections: u32,
    /// Percentage of max connections in use.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_pct: Option<f64>,
    pub disk_usage_bytes: u64,
    pub disk_usage_human: String,
    /// SELECT 1 round-trip, milliseconds. None when the query failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_latency_ms: Option<u128>,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Time a `SELECT 1` round-trip through the server.
pub fn query_latency(town_root: &Path) -> anyhow::Result<Duration> {
    let start = Instant::now();
    super::server_sql(town_root, "SELECT 1").context("SELECT 1 failed")?;
    Ok(start.elapsed())
}

/// Count active server connections via information_schema.PROCESSLIST.
pub fn active_connections(town_root: &Path) -> anyhow::Result<u32> {
    let lines = rig_sql_csv(
        town_root,
        "information_schema",
        "SELECT COUNT(*) AS cnt FROM information_schema.PROCESSLIST",
    )
    .context("querying connection count")?;

    // csv output: header line then the count.
    let Some(last) = lines.last() else {
        bail!("unexpected empty output from connection count query");
    };
    last.parse::<u32>()
        .with_context(|| format!("parsing connection count {last:?}"))
}

/// Whether the server can take another client.
///
/// Threshold is max(1, 80% of max_connections), leaving headroom for
/// in-flight operations. When the count cannot be measured the answer is
/// optimistic (true) plus the error: spawning is never blocked on a
/// missing signal.
pub fn has_connection_capacity(town_root: &Path) -> (bool, u32, Option<anyhow::Error>) {
    let config = ServerConfig::new(town_root);
    let max_conn = effective_max(config.max_connections);

    let active = match active_connections(town_root) {
        Ok(n) => n,
        Err(e) => return (true, 0, Some(e)),
    };

    (active < capacity_threshold(max_conn), active, None)
}

fn effective_max(configured: u32) -> u32 {
    if configured == 0 { 1000 } else { configured }
}

fn capacity_threshold(max_conn: u32) -> u32 {
    ((max_conn * 80) / 100).max(1)
}

/// Collect health metrics. Always returns what it can.
pub fn health_metrics(town_root: &Path) -> HealthMetrics {
    let config = ServerConfig::new(town_root);
    let max_connections = effective_max(config.max_connections);

    let mut metrics = HealthMetrics {
        connections: None,
        max_connections,
        connection_pct: None,
        disk_usage_bytes: 0,
        disk_usage_human: String::new(),
        query_latency_ms: None,
        healthy: true,
        warnings: Vec::new(),
    };

    if let Ok(latency) = query_latency(town_root) {
        metrics.query_latency_ms = Some(latency.as_millis());
        if latency > Duration::from_secs(1) {
            metrics.warnings.push(format!(
                "query latency {}ms exceeds 1s threshold — server may be under stress",
                latency.as_millis()
            ));
        }
    }

    if let Ok(count) = active_connections(town_root) {
        let pct = f64::from(count) / f64::from(max_connections) * 100.0;
        metrics.connections = Some(count);
        metrics.connection_pct = Some(pct);
        if pct >= 80.0 {
            metrics.healthy = false;
            metrics.warnings.push(format!(
                "connection count {count} is {pct:.0}% of max {max_connections} — approaching limit"
            ));
        }
    }

    metrics.disk_usage_bytes = fsutil::dir_size(&config.data_dir);
    metrics.disk_usage_human = fsutil::format_bytes(metrics.disk_usage_bytes);

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_80_percent() {
        assert_eq!(capacity_threshold(50), 40);
        assert_eq!(capacity_threshold(1000), 800);
    }

    #[test]
    fn threshold_floor_is_one() {
        assert_eq!(capacity_threshold(1), 1);
    }

    #[test]
    fn zero_max_means_dolt_default() {
        assert_eq!(effective_max(0), 1000);
        assert_eq!(effective_max(50), 50);
    }

    #[test]
    fn capacity_is_optimistic_when_unmeasurable() {
        // No server, no dolt data dir: the count query fails, capacity
        // answers true with the error attached.
        let tmp = tempfile::tempdir().unwrap();
        let (has_capacity, active, err) = has_connection_capacity(tmp.path());
        assert!(has_capacity);
        assert_eq!(active, 0);
        assert!(err.is_some());
    }

    #[test]
    fn metrics_are_partial_without_server() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(crate::paths::data_dir(tmp.path())).unwrap();
        std::fs::write(crate::paths::data_dir(tmp.path()).join("f"), vec![0u8; 64]).unwrap();

        let metrics = health_metrics(tmp.path());
        // SQL probes failed and were omitted; disk usage still measured.
        assert!(metrics.query_latency_ms.is_none());
        assert!(metrics.connections.is_none());
        assert_eq!(metrics.disk_usage_bytes, 64);
        assert!(metrics.healthy);
    }
}
