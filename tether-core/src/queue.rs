//! FIFO outbound queue feeding the send loop.
//!
//! Producers on any thread push; the I/O context owns the receiver.
//! The queue is opened once per client session and closed on
//! disconnect, so pushes against an idle client fail fast. Every `open`
//! starts a new [`Generation`]; a session may only close its own.

use std::sync::{Mutex, MutexGuard};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::error::TetherError;
use crate::message::Message;

/// Identifies one `open` of an [`OutboundQueue`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Generation(u64);

#[derive(Debug, Default)]
struct Inner {
    generation: Generation,
    tx: Option<UnboundedSender<Message>>,
}

#[derive(Debug, Default)]
pub struct OutboundQueue {
    inner: Mutex<Inner>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a fresh channel and return its receiving end. Any
    /// previous channel is closed.
    pub fn open(&self) -> UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner();
        inner.generation.0 += 1;
        inner.tx = Some(tx);
        rx
    }

    /// The generation installed by the latest `open`.
    pub fn generation(&self) -> Generation {
        self.inner().generation
    }

    /// Stop accepting messages.
    pub fn close(&self) {
        self.inner().tx.take();
    }

    /// Close the queue only if `generation` is still the current one.
    /// Returns `false` when a later `open` has replaced it.
    pub fn close_generation(&self, generation: Generation) -> bool {
        let mut inner = self.inner();
        if inner.generation != generation {
            return false;
        }
        inner.tx.take();
        true
    }

    pub fn is_open(&self) -> bool {
        self.inner().tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Enqueue `message` behind everything pushed before it.
    pub fn push(&self, message: Message) -> Result<(), TetherError> {
        match self.inner().tx.as_ref() {
            Some(tx) => Ok(tx.send(message)?),
            None => Err(TetherError::NotConnected),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
