//! Blocking façade over the async connection manager.
//!
//! A [`Client`] owns one `tether-io` thread per session, running a
//! current-thread tokio runtime that performs every socket operation.
//! Caller threads only ever touch the outbound queue, the correlator
//! and the status board.
//!
//! Callbacks run on the I/O thread and must not call `connect` or
//! `disconnect` on the same client.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::dispatcher::RequestHandler;
use crate::error::TetherError;
use crate::manager::{ConnectionManager, Shared};
use crate::message::{Message, Params, new_correlation_id};
use crate::state::{ConnectionState, StatusChange};
use crate::transport::Connector;

/// Extra time `connect` allows the I/O thread beyond the connect timeout.
const CONNECT_SLACK: Duration = Duration::from_millis(250);

pub struct Client {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl Client {
    /// Build a client for `config.endpoint`.
    pub fn new(config: ClientConfig) -> Result<Self, TetherError> {
        let connector = config.endpoint()?.connector(config.max_line_length);
        Ok(Self::with_connector(config, connector))
    }

    /// Build a client over a custom transport.
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let shared = Shared::new(&config.keepalive.action);
        Self {
            config,
            connector,
            shared,
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Start the session if none is running and wait for the first
    /// attempt to settle. Returns `true` only when connected; with
    /// reconnect enabled a failed first attempt keeps retrying in the
    /// background.
    pub fn connect(&self) -> bool {
        {
            let mut worker = self.worker();
            let running = worker.is_some() && self.shared.status.current().is_active();
            if !running {
                // A finished session leaves its thread behind to reap.
                if let Some(old) = worker.take() {
                    old.stop(self.config.shutdown_grace());
                }
                match self.start() {
                    Ok(started) => *worker = Some(started),
                    Err(e) => {
                        error!("could not start I/O thread: {e}");
                        self.shared.outbound.close();
                        self.shared.status.transition(ConnectionState::Error, Some(e));
                        return false;
                    }
                }
            }
        }

        let settled = self.shared.status.wait_until(
            self.config.connect_timeout() + CONNECT_SLACK,
            |state| state != ConnectionState::Connecting,
        );
        settled.is_connected()
    }

    fn start(&self) -> Result<Worker, TetherError> {
        let outbox = self.shared.outbound.open();
        self.shared.status.transition(ConnectionState::Connecting, None);

        let cancel = CancellationToken::new();
        let manager = ConnectionManager::new(
            &self.config,
            self.connector.clone(),
            self.shared.clone(),
            outbox,
            cancel.clone(),
        );
        info!(endpoint = %self.connector.describe(), "starting session");
        Worker::spawn(manager, cancel, self.config.shutdown_grace())
    }

    /// Stop the session, fail every pending request with `Disconnected`
    /// and settle in `DISCONNECTED`. Messages already queued are flushed
    /// within the shutdown grace period. Safe to call repeatedly.
    pub fn disconnect(&self) {
        let mut worker = self.worker();
        if let Some(running) = worker.take() {
            info!("disconnecting");
            running.stop(self.config.shutdown_grace());
        }
        self.shared.outbound.close();
        let failed = self.shared.correlator.cancel_all();
        if failed > 0 {
            debug!(failed, "pending requests failed by disconnect");
        }
        self.shared.status.transition(ConnectionState::Disconnected, None);
    }

    /// Send a request and block until its response or `timeout`.
    ///
    /// Safe to call from many threads at once. Accepted while a session
    /// exists (even mid-reconnect); the message waits in the queue.
    pub fn send_request(
        &self,
        action: &str,
        params: Params,
        timeout: Duration,
    ) -> Result<Value, TetherError> {
        if self.shared.status.current().is_idle() {
            return Err(TetherError::NotConnected);
        }

        let id = new_correlation_id();
        let mut message = Message::request(action, params);
        message.id = Some(id.clone());

        let handle = self.shared.correlator.register(id, action, timeout);
        self.shared.outbound.push(message)?;
        handle.wait()
    }

    /// Queue a fire-and-forget event. Returns `false` without a session.
    pub fn send_message(&self, action: &str, params: Params) -> bool {
        if self.shared.status.current().is_idle() {
            return false;
        }
        match self.shared.outbound.push(Message::event(action, params)) {
            Ok(()) => true,
            Err(e) => {
                debug!(%action, "message not queued: {e}");
                false
            }
        }
    }

    pub fn on_status_changed<F>(&self, callback: F)
    where
        F: Fn(&StatusChange) + Send + Sync + 'static,
    {
        self.shared.status.subscribe(callback);
    }

    pub fn on_event<F>(&self, callback: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.shared.dispatcher.on_event(callback);
    }

    /// Serve requests the peer sends to us.
    pub fn on_request<H: RequestHandler>(&self, handler: H) {
        self.shared.dispatcher.set_request_handler(Arc::new(handler));
    }

    pub fn is_connected(&self) -> bool {
        self.shared.status.current().is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.status.current()
    }

    /// Requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.correlator.pending_count()
    }

    fn worker(&self) -> MutexGuard<'_, Option<Worker>> {
        match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ── Worker ───────────────────────────────────────────────────────

/// The I/O thread of one session.
struct Worker {
    cancel: CancellationToken,
    done: mpsc::Receiver<()>,
    thread: JoinHandle<()>,
}

impl Worker {
    fn spawn(
        manager: ConnectionManager,
        cancel: CancellationToken,
        grace: Duration,
    ) -> Result<Self, TetherError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| TetherError::Other(format!("I/O runtime: {e}")))?;
        let (done_tx, done) = mpsc::channel();

        let thread = std::thread::Builder::new()
            .name("tether-io".into())
            .spawn(move || {
                runtime.block_on(manager.run());
                let _ = done_tx.send(());
                runtime.shutdown_timeout(grace);
            })?;

        Ok(Self {
            cancel,
            done,
            thread,
        })
    }

    fn stop(self, grace: Duration) {
        self.cancel.cancel();
        match self.done.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.thread.join().is_err() {
                    error!("I/O thread panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("I/O thread did not stop within {grace:?}; detaching it");
            }
        }
    }
}
