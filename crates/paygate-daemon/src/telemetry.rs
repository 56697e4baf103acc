use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::downstream::Downstream;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry server failed: {0}")]
    Server(std::io::Error),
}

/// Daemon heartbeat wrapping the fronted service's own status, published at
/// `/heartbeat` on the telemetry listener.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHeartbeat {
    #[serde(rename = "daemonID")]
    pub daemon_id: String,
    pub timestamp: String,
    pub status: String,
    #[serde(rename = "serviceheartbeat")]
    pub service_heartbeat: String,
}

#[derive(Debug, Default)]
struct TelemetryState {
    payment_rejects_total: HashMap<String, u64>,
    commits_total: u64,
    rollbacks_total: u64,
    revenue_loss_total: u64,
    requests_total: HashMap<(String, String), u64>,
    response_latency_ms_sum: HashMap<String, u64>,
    response_latency_ms_count: HashMap<String, u64>,
}

/// Request and payment counters plus the heartbeat, rendered as Prometheus
/// text at `/metrics`.
#[derive(Debug)]
pub struct Telemetry {
    state: Mutex<TelemetryState>,
    daemon_id: String,
    service_id: String,
}

/// Stable daemon identity: replicas derive it from their group and listen
/// endpoint so heartbeats stay attributable across restarts.
pub fn derive_daemon_id(replica_group_id: &str, listen: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(replica_group_id.as_bytes());
    hasher.update(b":");
    hasher.update(listen.as_bytes());
    hex::encode(hasher.finalize())
}

impl Telemetry {
    pub fn new(daemon_id: impl Into<String>, service_id: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(TelemetryState::default()),
            daemon_id: daemon_id.into(),
            service_id: service_id.into(),
        }
    }

    pub fn daemon_id(&self) -> &str {
        &self.daemon_id
    }

    pub fn record_reject(&self, code: &str) {
        let mut guard = self.state.lock();
        let entry = guard
            .payment_rejects_total
            .entry(code.to_string())
            .or_insert(0);
        *entry = entry.saturating_add(1);
    }

    pub fn record_commit(&self) {
        let mut guard = self.state.lock();
        guard.commits_total = guard.commits_total.saturating_add(1);
    }

    pub fn record_rollback(&self) {
        let mut guard = self.state.lock();
        guard.rollbacks_total = guard.rollbacks_total.saturating_add(1);
    }

    pub fn record_revenue_loss(&self) {
        let mut guard = self.state.lock();
        guard.revenue_loss_total = guard.revenue_loss_total.saturating_add(1);
    }

    pub fn record_response(&self, method: &str, code: &str, elapsed: Duration) {
        let mut guard = self.state.lock();
        let entry = guard
            .requests_total
            .entry((method.to_string(), code.to_string()))
            .or_insert(0);
        *entry = entry.saturating_add(1);
        let elapsed_ms = elapsed.as_millis() as u64;
        let sum = guard
            .response_latency_ms_sum
            .entry(method.to_string())
            .or_insert(0);
        *sum = sum.saturating_add(elapsed_ms);
        let count = guard
            .response_latency_ms_count
            .entry(method.to_string())
            .or_insert(0);
        *count = count.saturating_add(1);
    }

    pub fn render(&self) -> String {
        let guard = self.state.lock();
        let mut out = String::new();
        out.push_str("# TYPE paygate_payment_rejects_total counter\n");
        for (code, value) in &guard.payment_rejects_total {
            let _ = writeln!(
                out,
                "paygate_payment_rejects_total{{code=\"{}\"}} {}",
                code, value
            );
        }
        out.push_str("# TYPE paygate_commits_total counter\n");
        let _ = writeln!(out, "paygate_commits_total {}", guard.commits_total);
        out.push_str("# TYPE paygate_rollbacks_total counter\n");
        let _ = writeln!(out, "paygate_rollbacks_total {}", guard.rollbacks_total);
        out.push_str("# TYPE paygate_revenue_loss_total counter\n");
        let _ = writeln!(out, "paygate_revenue_loss_total {}", guard.revenue_loss_total);
        out.push_str("# TYPE paygate_requests_total counter\n");
        for ((method, code), value) in &guard.requests_total {
            let _ = writeln!(
                out,
                "paygate_requests_total{{method=\"{}\",code=\"{}\"}} {}",
                method, code, value
            );
        }
        out.push_str("# TYPE paygate_response_latency_ms_sum counter\n");
        for (method, value) in &guard.response_latency_ms_sum {
            let _ = writeln!(
                out,
                "paygate_response_latency_ms_sum{{method=\"{}\"}} {}",
                method, value
            );
        }
        out.push_str("# TYPE paygate_response_latency_ms_count counter\n");
        for (method, value) in &guard.response_latency_ms_count {
            let _ = writeln!(
                out,
                "paygate_response_latency_ms_count{{method=\"{}\"}} {}",
                method, value
            );
        }
        out
    }

    pub async fn heartbeat(&self, downstream: &dyn Downstream) -> DaemonHeartbeat {
        let (status, service_heartbeat) = match downstream.health().await {
            Ok(service_status) => (
                "Online".to_string(),
                format!(
                    r#"{{"serviceID":"{}","status":"{}"}}"#,
                    self.service_id, service_status
                ),
            ),
            Err(err) => {
                tracing::warn!(error = %err, "service heartbeat probe failed");
                (
                    "Warning".to_string(),
                    format!(
                        r#"{{"serviceID":"{}","status":"NOT_SERVING"}}"#,
                        self.service_id
                    ),
                )
            }
        };
        DaemonHeartbeat {
            daemon_id: self.daemon_id.clone(),
            timestamp: epoch_seconds().to_string(),
            status,
            service_heartbeat,
        }
    }

    /// Serves `/metrics` and `/heartbeat` on a dedicated listener, away from
    /// the payment-gated gRPC port.
    pub async fn spawn_server(
        self: Arc<Self>,
        addr: SocketAddr,
        downstream: Arc<dyn Downstream>,
    ) -> Result<tokio::task::JoinHandle<()>, TelemetryError> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(TelemetryError::Server)?;
        Ok(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((mut socket, _)) => {
                        let telemetry = self.clone();
                        let downstream = downstream.clone();
                        tokio::spawn(async move {
                            let mut buf = vec![0_u8; 2048];
                            match socket.read(&mut buf).await {
                                Ok(n) if n > 0 => {
                                    let req = String::from_utf8_lossy(&buf[..n]);
                                    let (status, body) = if req.starts_with("GET /metrics ") {
                                        ("200 OK", telemetry.render())
                                    } else if req.starts_with("GET /heartbeat ") {
                                        let heartbeat =
                                            telemetry.heartbeat(downstream.as_ref()).await;
                                        match serde_json::to_string(&heartbeat) {
                                            Ok(body) => ("200 OK", body),
                                            Err(_) => (
                                                "500 Internal Server Error",
                                                "heartbeat encoding failed".to_string(),
                                            ),
                                        }
                                    } else {
                                        ("404 Not Found", "not found".to_string())
                                    };
                                    let response = format!(
                                        "HTTP/1.1 {status}\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                                        body.len(), body
                                    );
                                    let _ = socket.write_all(response.as_bytes()).await;
                                }
                                Ok(_) => {}
                                Err(err) => {
                                    tracing::warn!(error = %err, "telemetry socket read failed");
                                }
                            }
                        });
                    }
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => {
                        tracing::error!(error = %err, "telemetry server accept failed");
                        break;
                    }
                }
            }
        }))
    }
}

fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
