//! Callback registration and fan-out.
//!
//! Each subscriber is invoked in isolation: a panicking callback is
//! logged and skipped, and delivery continues to the rest.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};

use tracing::warn;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;

pub struct Subscribers<T: ?Sized> {
    name: &'static str,
    callbacks: RwLock<Vec<Callback<T>>>,
}

impl<T: ?Sized> Subscribers<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            callbacks: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut callbacks = match self.callbacks.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        callbacks.push(Arc::new(callback));
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `value` to every subscriber. Returns how many returned
    /// normally.
    pub fn notify(&self, value: &T) -> usize {
        // Callbacks run outside the lock so they may subscribe.
        let callbacks = self.snapshot();
        let mut delivered = 0;
        for (index, callback) in callbacks.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| callback(value))) {
                Ok(()) => delivered += 1,
                Err(panic) => warn!(
                    subscribers = self.name,
                    index,
                    "subscriber panicked: {}",
                    panic_message(panic.as_ref())
                ),
            }
        }
        delivered
    }

    fn snapshot(&self) -> Vec<Callback<T>> {
        match self.callbacks.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
