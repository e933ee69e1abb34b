//! The reconnect state machine and the per-session I/O loops.
//!
//! [`ConnectionManager::run`] is the whole life of one client session:
//! connect, serve the transport until it fails, back off, try again,
//! until the session is cancelled or the reconnect budget runs out.
//! It is the only writer of the connection state while it runs.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::correlator::Correlator;
use crate::dispatcher::Dispatcher;
use crate::error::TetherError;
use crate::keepalive::{KeepaliveConfig, keepalive_loop};
use crate::message::Message;
use crate::queue::{Generation, OutboundQueue};
use crate::state::{Backoff, ConnectionState, ReconnectPolicy, StatusBoard};
use crate::transport::{Connector, InboundStream, MessageSink, Transport};

/// Components shared by the façade and the I/O thread.
pub struct Shared {
    pub status: StatusBoard,
    pub correlator: Arc<Correlator>,
    pub outbound: Arc<OutboundQueue>,
    pub dispatcher: Dispatcher,
}

impl Shared {
    pub fn new(keepalive_action: &str) -> Arc<Self> {
        let correlator = Arc::new(Correlator::new());
        let outbound = Arc::new(OutboundQueue::new());
        let dispatcher = Dispatcher::new(correlator.clone(), outbound.clone(), keepalive_action);
        Arc::new(Self {
            status: StatusBoard::new(),
            correlator,
            outbound,
            dispatcher,
        })
    }
}

/// How one connected session ended.
#[derive(Debug)]
enum SessionEnd {
    Cancelled,
    Lost(TetherError),
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    outbox: Arc<Mutex<UnboundedReceiver<Message>>>,
    generation: Generation,
    policy: ReconnectPolicy,
    keepalive: KeepaliveConfig,
    connect_timeout: Duration,
    grace: Duration,
    cancel: CancellationToken,
}

impl ConnectionManager {
    /// `outbox` must come from the latest `open` of `shared.outbound`;
    /// the manager owns that queue generation.
    pub fn new(
        config: &ClientConfig,
        connector: Arc<dyn Connector>,
        shared: Arc<Shared>,
        outbox: UnboundedReceiver<Message>,
        cancel: CancellationToken,
    ) -> Self {
        let generation = shared.outbound.generation();
        Self {
            connector,
            shared,
            outbox: Arc::new(Mutex::new(outbox)),
            generation,
            policy: config.reconnect.clone(),
            keepalive: config.keepalive.clone(),
            connect_timeout: config.connect_timeout(),
            grace: config.shutdown_grace(),
            cancel,
        }
    }

    /// Drive the session until cancelled or settled in `ERROR`. Every
    /// pending request is failed before this returns, unless a newer
    /// session has opened the queue since.
    pub async fn run(self) {
        let status = &self.shared.status;
        let mut backoff = Backoff::new(self.policy.clone());
        let target = self.connector.describe();

        loop {
            status.transition(ConnectionState::Connecting, None);
            debug!(%target, attempt = backoff.attempts(), "connecting");

            let attempt = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                r = tokio::time::timeout(self.connect_timeout, self.connector.connect()) => {
                    r.unwrap_or(Err(TetherError::ConnectTimeout(self.connect_timeout)))
                }
            };

            let fault = match attempt {
                Ok(transport) => {
                    backoff.reset();
                    info!(peer = %transport.peer, "connected");
                    status.transition(ConnectionState::Connected, None);

                    match self.run_session(transport).await {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Lost(e) if !self.policy.enabled => {
                            info!("connection lost: {e}");
                            status.transition(ConnectionState::Disconnected, Some(e));
                            break;
                        }
                        SessionEnd::Lost(e) => {
                            info!("connection lost: {e}");
                            e
                        }
                    }
                }
                Err(e) if !self.policy.enabled => {
                    warn!(%target, "connect failed: {e}");
                    status.transition(ConnectionState::Error, Some(e));
                    break;
                }
                Err(e) => {
                    warn!(%target, "connect failed: {e}");
                    e
                }
            };

            let Some(delay) = backoff.next_delay() else {
                let attempts = backoff.attempts();
                warn!(%target, attempts, "reconnect budget exhausted");
                status.transition(
                    ConnectionState::Error,
                    Some(TetherError::MaxReconnectAttemptsExceeded { attempts }),
                );
                break;
            };

            status.transition(ConnectionState::Reconnecting, Some(fault));
            info!(attempt = backoff.attempts(), ?delay, "reconnecting");
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        // A detached worker outliving its grace period must not tear down
        // the session that replaced it.
        if !self.shared.outbound.close_generation(self.generation) {
            debug!("outbound queue reopened by a newer session; leaving shared state alone");
            return;
        }
        let failed = self.shared.correlator.cancel_all();
        if failed > 0 {
            debug!(failed, "pending requests failed on shutdown");
        }
        if self.cancel.is_cancelled() {
            status.transition(ConnectionState::Disconnected, None);
        }
    }

    /// Serve one connected transport until any loop stops.
    async fn run_session(&self, transport: Transport) -> SessionEnd {
        let Transport { sink, stream, peer } = transport;
        let session = self.cancel.child_token();

        let mut loops = JoinSet::new();
        loops.spawn(receive_loop(stream, self.shared.clone(), session.clone()));
        loops.spawn(send_loop(
            sink,
            self.outbox.clone(),
            session.clone(),
            self.cancel.clone(),
        ));
        loops.spawn(keepalive_loop(
            self.keepalive.clone(),
            self.shared.correlator.clone(),
            self.shared.outbound.clone(),
            session.clone(),
        ));

        let first = loops.join_next().await;
        session.cancel();

        let end = if self.cancel.is_cancelled() {
            SessionEnd::Cancelled
        } else {
            SessionEnd::Lost(match first {
                Some(Ok(Err(e))) => e,
                Some(Err(e)) => TetherError::Other(format!("session loop failed: {e}")),
                Some(Ok(Ok(()))) | None => TetherError::PeerClosed,
            })
        };

        let drain = async { while loops.join_next().await.is_some() {} };
        if tokio::time::timeout(self.grace, drain).await.is_err() {
            warn!(%peer, "session loops did not stop within {:?}; aborting", self.grace);
            loops.abort_all();
        }
        debug!(%peer, "session closed");
        end
    }
}

/// Read frames and hand each to the dispatcher. Malformed frames arrive
/// as values and never end the loop.
async fn receive_loop(
    mut stream: InboundStream,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) -> Result<(), TetherError> {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            next = stream.next() => next,
        };
        match next {
            Some(Ok(inbound)) => {
                shared.dispatcher.dispatch(inbound);
            }
            Some(Err(e)) => return Err(e),
            None => return Err(TetherError::PeerClosed),
        }
    }
}

/// Drain the outbound queue into the transport in FIFO order. The queue
/// outlives the session: after a transport failure whatever is still
/// queued goes to the next one, while a client `shutdown` flushes it into
/// this transport first.
async fn send_loop(
    mut sink: MessageSink,
    outbox: Arc<Mutex<UnboundedReceiver<Message>>>,
    cancel: CancellationToken,
    shutdown: CancellationToken,
) -> Result<(), TetherError> {
    let mut outbox = outbox.lock().await;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = outbox.recv() => next,
        };
        match next {
            Some(message) => {
                debug!(action = %message.action(), kind = %message.kind, "sending");
                sink.send(message).await?;
            }
            // Queue closed by disconnect; cancellation follows.
            None => {
                cancel.cancelled().await;
                break;
            }
        }
    }
    if shutdown.is_cancelled() {
        while let Ok(message) = outbox.try_recv() {
            debug!(action = %message.action(), kind = %message.kind, "flushing");
            sink.send(message).await?;
        }
    }
    if let Err(e) = sink.close().await {
        debug!("closing transport: {e}");
    }
    Ok(())
}
