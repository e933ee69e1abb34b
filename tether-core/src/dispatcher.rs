//! Inbound routing.
//!
//! Every decoded message is classified exactly once:
//!
//! | Inbound                          | Route                              |
//! |----------------------------------|------------------------------------|
//! | `response` with an id            | [`Correlator::resolve`]            |
//! | `event`                          | event subscribers                  |
//! | `request` for the keepalive action | answered, nothing else sees it   |
//! | `request`                        | registered [`RequestHandler`]      |
//! | anything else / malformed        | logged and dropped                 |
//!
//! Nothing raised by a subscriber or handler escapes `dispatch`.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};

use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::correlator::Correlator;
use crate::message::{Inbound, Message, MessageKind, PROTOCOL_VERSION, Params};
use crate::observer::Subscribers;
use crate::queue::OutboundQueue;

/// Executes actions named by requests the peer sends to us.
pub trait RequestHandler: Send + Sync + 'static {
    /// `Ok` becomes the response `result`, `Err` its `error`.
    fn handle(&self, action: &str, params: &Params) -> Result<Value, String>;
}

impl<F> RequestHandler for F
where
    F: Fn(&str, &Params) -> Result<Value, String> + Send + Sync + 'static,
{
    fn handle(&self, action: &str, params: &Params) -> Result<Value, String> {
        self(action, params)
    }
}

/// Where a message went; mostly useful to tests and traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Resolved,
    Unmatched,
    Event { delivered: usize },
    Keepalive,
    Handled,
    Discarded,
}

pub struct Dispatcher {
    correlator: Arc<Correlator>,
    outbound: Arc<OutboundQueue>,
    events: Subscribers<Message>,
    handler: RwLock<Option<Arc<dyn RequestHandler>>>,
    keepalive_action: String,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("event_subscribers", &self.events.len())
            .field("keepalive_action", &self.keepalive_action)
            .finish()
    }
}

impl Dispatcher {
    pub fn new(
        correlator: Arc<Correlator>,
        outbound: Arc<OutboundQueue>,
        keepalive_action: impl Into<String>,
    ) -> Self {
        Self {
            correlator,
            outbound,
            events: Subscribers::new("event"),
            handler: RwLock::new(None),
            keepalive_action: keepalive_action.into(),
        }
    }

    pub fn on_event<F>(&self, callback: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.events.subscribe(callback);
    }

    /// Install the handler for inbound requests, replacing any previous one.
    pub fn set_request_handler(&self, handler: Arc<dyn RequestHandler>) {
        match self.handler.write() {
            Ok(mut slot) => *slot = Some(handler),
            Err(poisoned) => *poisoned.into_inner() = Some(handler),
        }
    }

    pub fn dispatch(&self, inbound: Inbound) -> Route {
        let message = match inbound {
            Inbound::Message(message) => message,
            Inbound::Malformed(e) => {
                warn!("dropping inbound frame: {e}");
                return Route::Discarded;
            }
        };

        if message.version != PROTOCOL_VERSION {
            warn!(version = %message.version, "peer speaks a different protocol version");
        }

        match message.kind {
            MessageKind::Response => self.route_response(message),
            MessageKind::Event => {
                debug!(action = %message.action(), "event received");
                Route::Event {
                    delivered: self.events.notify(&message),
                }
            }
            MessageKind::Request => self.route_request(message),
            MessageKind::Unknown => {
                warn!(action = %message.action(), "dropping message of unknown type");
                Route::Discarded
            }
        }
    }

    fn route_response(&self, message: Message) -> Route {
        let Some(id) = message.id() else {
            warn!(action = %message.action(), "dropping response without id");
            return Route::Discarded;
        };
        if self.correlator.resolve(id, message.outcome()) {
            Route::Resolved
        } else {
            Route::Unmatched
        }
    }

    fn route_request(&self, message: Message) -> Route {
        if message.action() == self.keepalive_action {
            if let Some(id) = message.id() {
                self.reply(Message::success(id, message.action(), json!({"ok": true})));
            }
            return Route::Keepalive;
        }

        let handler = match self.handler.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let Some(handler) = handler else {
            warn!(action = %message.action(), "no request handler registered; dropping request");
            return Route::Discarded;
        };

        let outbound = Arc::clone(&self.outbound);
        let run = move || {
            let id = message.id.clone();
            let action = message.payload.action.clone();
            let reply = match handler.handle(&action, &message.payload.params) {
                Ok(result) => id.map(|id| Message::success(id, &action, result)),
                Err(error) => id.map(|id| Message::failure(id, &action, error)),
            };
            if let Some(reply) = reply
                && let Err(e) = outbound.push(reply)
            {
                warn!(%action, "could not queue response: {e}");
            }
        };

        // Handlers may block; keep them off the I/O loop when there is one.
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let task = runtime.spawn_blocking(run);
                runtime.spawn(async move {
                    if let Err(e) = task.await {
                        warn!("request handler failed: {e}");
                    }
                });
            }
            Err(_) => {
                if catch_unwind(AssertUnwindSafe(run)).is_err() {
                    warn!("request handler panicked");
                }
            }
        }
        Route::Handled
    }

    fn reply(&self, message: Message) {
        if let Err(e) = self.outbound.push(message) {
            debug!("could not queue keepalive reply: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProtocolError, TetherError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn fixture() -> (Arc<Correlator>, Arc<OutboundQueue>, Dispatcher) {
        let correlator = Arc::new(Correlator::new());
        let outbound = Arc::new(OutboundQueue::new());
        let dispatcher = Dispatcher::new(correlator.clone(), outbound.clone(), "ping");
        (correlator, outbound, dispatcher)
    }

    #[test]
    fn response_resolves_waiter() {
        let (correlator, _, dispatcher) = fixture();
        let handle = correlator.register("42", "click", Duration::from_secs(5));
        let route = dispatcher.dispatch(Inbound::Message(Message::success("42", "click", json!(7))));
        assert_eq!(route, Route::Resolved);
        assert_eq!(handle.wait().unwrap(), json!(7));
    }

    #[test]
    fn response_with_unknown_id_is_unmatched() {
        let (_, _, dispatcher) = fixture();
        let route = dispatcher.dispatch(Inbound::Message(Message::success("nope", "x", json!(1))));
        assert_eq!(route, Route::Unmatched);
    }

    #[test]
    fn response_without_id_is_discarded() {
        let (_, _, dispatcher) = fixture();
        let mut m = Message::success("x", "x", json!(1));
        m.id = None;
        assert_eq!(dispatcher.dispatch(Inbound::Message(m)), Route::Discarded);
    }

    #[test]
    fn remote_error_is_delivered() {
        let (correlator, _, dispatcher) = fixture();
        let handle = correlator.register("1", "type", Duration::from_secs(5));
        dispatcher.dispatch(Inbound::Message(Message::failure("1", "type", "locked")));
        assert!(matches!(handle.wait(), Err(TetherError::Remote(e)) if e == "locked"));
    }

    #[test]
    fn events_reach_subscribers_even_if_one_panics() {
        let (_, _, dispatcher) = fixture();
        let count = Arc::new(AtomicUsize::new(0));
        dispatcher.on_event(|_| panic!("bad subscriber"));
        let c = count.clone();
        dispatcher.on_event(move |m| {
            assert_eq!(m.action(), "chat.message");
            c.fetch_add(1, Ordering::SeqCst);
        });

        let route = dispatcher.dispatch(Inbound::Message(Message::event("chat.message", Params::new())));
        assert_eq!(route, Route::Event { delivered: 1 });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn malformed_and_unknown_are_discarded() {
        let (_, _, dispatcher) = fixture();
        let route = dispatcher.dispatch(Inbound::Malformed(ProtocolError::UnexpectedFrame("binary")));
        assert_eq!(route, Route::Discarded);

        let mut m = Message::event("x", Params::new());
        m.kind = MessageKind::Unknown;
        assert_eq!(dispatcher.dispatch(Inbound::Message(m)), Route::Discarded);
    }

    #[test]
    fn peer_keepalive_is_answered_silently() {
        let (_, outbound, dispatcher) = fixture();
        let mut rx = outbound.open();
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        dispatcher.on_event(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });

        let ping = Message::request("ping", Params::new());
        let route = dispatcher.dispatch(Inbound::Message(ping.clone()));
        assert_eq!(route, Route::Keepalive);

        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.kind, MessageKind::Response);
        assert_eq!(reply.id(), ping.id());
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn event_named_like_keepalive_reaches_subscribers() {
        let (_, outbound, dispatcher) = fixture();
        let mut rx = outbound.open();
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        dispatcher.on_event(move |m| {
            assert_eq!(m.action(), "ping");
            s.fetch_add(1, Ordering::SeqCst);
        });

        let route = dispatcher.dispatch(Inbound::Message(Message::event("ping", Params::new())));
        assert_eq!(route, Route::Event { delivered: 1 });
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn request_without_handler_is_discarded() {
        let (_, _, dispatcher) = fixture();
        let route = dispatcher.dispatch(Inbound::Message(Message::request("click", Params::new())));
        assert_eq!(route, Route::Discarded);
    }

    #[test]
    fn request_handler_reply_outside_runtime() {
        let (_, outbound, dispatcher) = fixture();
        let mut rx = outbound.open();
        dispatcher.set_request_handler(Arc::new(|action: &str, _: &Params| {
            if action == "screen.size" {
                Ok(json!({"w": 1920, "h": 1080}))
            } else {
                Err(format!("unsupported action {action}"))
            }
        }));

        let ok = Message::request("screen.size", Params::new());
        assert_eq!(dispatcher.dispatch(Inbound::Message(ok.clone())), Route::Handled);
        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.id(), ok.id());
        assert_eq!(reply.outcome().unwrap(), json!({"w": 1920, "h": 1080}));

        let bad = Message::request("reboot", Params::new());
        dispatcher.dispatch(Inbound::Message(bad));
        let reply = rx.try_recv().unwrap();
        assert!(matches!(reply.outcome(), Err(TetherError::Remote(e)) if e.contains("reboot")));
    }

    #[tokio::test]
    async fn request_handler_runs_on_blocking_pool() {
        let (_, outbound, dispatcher) = fixture();
        let mut rx = outbound.open();
        dispatcher.set_request_handler(Arc::new(|_: &str, params: &Params| {
            std::thread::sleep(Duration::from_millis(10));
            Ok(Value::Object(params.clone()))
        }));

        let mut params = Params::new();
        params.insert("k".into(), json!("v"));
        let req = Message::request("echo", params);
        assert_eq!(dispatcher.dispatch(Inbound::Message(req.clone())), Route::Handled);

        let reply = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.id(), req.id());
        assert_eq!(reply.outcome().unwrap(), json!({"k": "v"}));
    }
}
