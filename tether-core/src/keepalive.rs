//! Application-level liveness probe.
//!
//! While a session is up, a `request` naming the keepalive action is sent
//! every `interval`. Any response, even a remote error, proves the peer is
//! alive. A probe that times out ends the session like any other I/O fault.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::correlator::Correlator;
use crate::error::TetherError;
use crate::message::{Message, Params, new_correlation_id};
use crate::queue::OutboundQueue;

/// Keepalive settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    pub enabled: bool,
    /// Time between probes, in milliseconds.
    pub interval_ms: u64,
    /// How long one probe may go unanswered, in milliseconds.
    pub timeout_ms: u64,
    /// Action named by the probe request.
    pub action: String,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30_000,
            timeout_ms: 10_000,
            action: "ping".to_string(),
        }
    }
}

impl KeepaliveConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Probe the peer until `cancel` fires (`Ok`) or a probe fails (`Err`).
pub async fn keepalive_loop(
    config: KeepaliveConfig,
    correlator: Arc<Correlator>,
    outbound: Arc<OutboundQueue>,
    cancel: CancellationToken,
) -> Result<(), TetherError> {
    if !config.enabled {
        cancel.cancelled().await;
        return Ok(());
    }

    let interval = config.interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }

        let round_trip = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            r = probe(&config, &correlator, &outbound) => r,
        };
        match round_trip {
            Ok(rtt) => debug!(?rtt, "keepalive answered"),
            Err(e) => {
                warn!("keepalive failed: {e}");
                return Err(TetherError::KeepaliveFailed(e.to_string()));
            }
        }
    }
}

/// One probe round trip. Only one is in flight at a time, so unanswered
/// probes cannot pile up in the correlator.
async fn probe(
    config: &KeepaliveConfig,
    correlator: &Arc<Correlator>,
    outbound: &OutboundQueue,
) -> Result<Duration, TetherError> {
    let id = new_correlation_id();
    let mut message = Message::request(&config.action, Params::new());
    message.id = Some(id.clone());

    let handle = correlator.register(id, &config.action, config.timeout());
    let sent_at = Instant::now();
    outbound.push(message)?;

    let outcome = tokio::task::spawn_blocking(move || handle.wait())
        .await
        .map_err(|e| TetherError::Other(format!("keepalive waiter failed: {e}")))?;
    match outcome {
        Ok(_) | Err(TetherError::Remote(_)) => Ok(sent_at.elapsed()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fast(timeout_ms: u64) -> KeepaliveConfig {
        KeepaliveConfig {
            enabled: true,
            interval_ms: 10,
            timeout_ms,
            action: "ping".into(),
        }
    }

    #[test]
    fn defaults() {
        let config = KeepaliveConfig::default();
        assert!(config.enabled);
        assert_eq!(config.interval(), Duration::from_secs(30));
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.action, "ping");
    }

    #[tokio::test]
    async fn disabled_waits_for_cancel() {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(keepalive_loop(
            KeepaliveConfig::disabled(),
            Arc::new(Correlator::new()),
            Arc::new(OutboundQueue::new()),
            cancel.clone(),
        ));
        cancel.cancel();
        tokio_test::assert_ok!(task.await.unwrap());
    }

    #[tokio::test]
    async fn unanswered_probe_is_a_fault() {
        let correlator = Arc::new(Correlator::new());
        let outbound = Arc::new(OutboundQueue::new());
        let _rx = outbound.open();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            keepalive_loop(fast(20), correlator.clone(), outbound, CancellationToken::new()),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(TetherError::KeepaliveFailed(_))));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn closed_queue_is_a_fault() {
        let result = keepalive_loop(
            fast(1_000),
            Arc::new(Correlator::new()),
            Arc::new(OutboundQueue::new()),
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(TetherError::KeepaliveFailed(_))));
    }

    #[tokio::test]
    async fn answered_probes_keep_running() {
        let correlator = Arc::new(Correlator::new());
        let outbound = Arc::new(OutboundQueue::new());
        let mut rx = outbound.open();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(keepalive_loop(
            fast(2_000),
            correlator.clone(),
            outbound,
            cancel.clone(),
        ));

        // Answer three probes, one with a remote error.
        for round in 0..3 {
            let probe = rx.recv().await.unwrap();
            assert_eq!(probe.action(), "ping");
            let id = probe.id().unwrap().to_string();
            let outcome = if round == 1 {
                Err(TetherError::Remote("busy".into()))
            } else {
                Ok(json!({"ok": true}))
            };
            // The waiter registers before the push, so the entry exists.
            assert!(correlator.resolve(&id, outcome));
        }

        cancel.cancel();
        tokio_test::assert_ok!(task.await.unwrap());
    }
}
