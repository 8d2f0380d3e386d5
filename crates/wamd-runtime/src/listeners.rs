//! Listener dispatch
//!
//! Each registered listener owns an unbounded queue drained by its own tokio
//! task, so dispatch never blocks the pipeline and every listener sees events
//! in the order they were dispatched. A slow listener only delays itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::events::Event;
use crate::services::Listener;

pub type ListenerId = u64;

#[derive(Debug, Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    queues: DashMap<ListenerId, mpsc::UnboundedSender<Arc<Event>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start delivering events to `listener`
    ///
    /// Must be called inside a tokio runtime.
    pub fn register(&self, listener: Arc<dyn Listener>) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::unbounded_channel::<Arc<Event>>();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                listener.on_event(event).await;
            }
            trace!(listener = id, "Listener queue closed");
        });
        self.queues.insert(id, tx);
        debug!(listener = id, "Registered listener");
        id
    }

    /// Stop delivering events; already queued events are still delivered
    pub fn unregister(&self, id: ListenerId) -> bool {
        self.queues.remove(&id).is_some()
    }

    pub fn dispatch(&self, event: Event) {
        let event = Arc::new(event);
        trace!(event = event.name(), listeners = self.queues.len(), "Dispatching event");
        self.queues
            .retain(|id, queue| match queue.send(Arc::clone(&event)) {
                Ok(()) => true,
                Err(_) => {
                    debug!(listener = *id, "Dropping listener with closed queue");
                    false
                }
            });
    }

    pub fn listener_count(&self) -> usize {
        self.queues.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use wamd_core::Jid;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Arc<Event>>>,
    }

    #[async_trait]
    impl Listener for Recorder {
        async fn on_event(&self, event: Arc<Event>) {
            self.seen.lock().await.push(event);
        }
    }

    fn chat(n: u32) -> Event {
        Event::ChatCreated {
            chat: Jid::parse(&format!("1555000{n:04}@s.whatsapp.net")).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let registry = ListenerRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry.register(recorder.clone());

        for n in 0..20 {
            registry.dispatch(chat(n));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let seen = recorder.seen.lock().await;
        assert_eq!(seen.len(), 20);
        for (n, event) in seen.iter().enumerate() {
            assert_eq!(**event, chat(n as u32));
        }
    }

    #[tokio::test]
    async fn test_unregistered_listener_stops_receiving() {
        let registry = ListenerRegistry::new();
        let recorder = Arc::new(Recorder::default());
        let id = registry.register(recorder.clone());
        registry.dispatch(chat(1));
        assert!(registry.unregister(id));
        registry.dispatch(chat(2));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(recorder.seen.lock().await.len(), 1);
        assert_eq!(registry.listener_count(), 0);
    }
}
