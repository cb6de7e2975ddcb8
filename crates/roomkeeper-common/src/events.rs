//! Extendable event dispatch.
//!
//! A [`Dispatcher`] is a publish/subscribe point whose `emit` does not
//! complete until every subscribed listener's future has completed. Each
//! listener runs as its own task, so a listener that fails or panics is
//! logged and never blocks the others or the emitter.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::{join_all, BoxFuture, FutureExt};
use tracing::warn;

use crate::errors::ListenerError;

type Handler<E> = Arc<dyn Fn(E) -> BoxFuture<'static, Result<(), ListenerError>> + Send + Sync>;

/// Handle returned by [`Dispatcher::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listeners<E> {
    next_id: u64,
    handlers: Vec<(ListenerId, Handler<E>)>,
}

pub struct Dispatcher<E> {
    name: &'static str,
    listeners: Arc<Mutex<Listeners<E>>>,
}

impl<E> Clone for Dispatcher<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            listeners: Arc::clone(&self.listeners),
        }
    }
}

impl<E> std::fmt::Debug for Dispatcher<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.name)
            .field("listeners", &self.len())
            .finish()
    }
}

impl<E> Dispatcher<E> {
    /// `name` only shows up in logs.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            listeners: Arc::new(Mutex::new(Listeners {
                next_id: 1,
                handlers: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Listeners<E>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.handlers.len();
        listeners.handlers.retain(|(lid, _)| *lid != id);
        listeners.handlers.len() != before
    }

    pub fn clear(&self) {
        self.lock().handlers.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: Clone + Send + 'static> Dispatcher<E> {
    pub fn subscribe<F, Fut>(&self, handler: F) -> ListenerId
    where
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
    {
        let handler: Handler<E> = Arc::new(move |event| handler(event).boxed());
        let mut listeners = self.lock();
        let id = ListenerId(listeners.next_id);
        listeners.next_id += 1;
        listeners.handlers.push((id, handler));
        id
    }

    /// Dispatch `event` to every listener and wait for all of them.
    /// Returns the number of listeners that completed without error.
    pub async fn emit(&self, event: E) -> usize {
        let handlers: Vec<Handler<E>> = self
            .lock()
            .handlers
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();

        let tasks = handlers
            .into_iter()
            .map(|handler| tokio::spawn(handler(event.clone())));

        let mut ok = 0;
        for result in join_all(tasks).await {
            match result {
                Ok(Ok(())) => ok += 1,
                Ok(Err(e)) => warn!(event = self.name, error = %e, "Listener failed"),
                Err(e) => warn!(event = self.name, error = %e, "Listener panicked"),
            }
        }
        ok
    }
}
