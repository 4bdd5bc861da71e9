//! Event Dispatch
//!
//! Each service owns a `Dispatcher` with two independently clearable slots:
//! one for status changes, one for data updates. Emission runs on the service
//! task while holding the slot lock, so once `clear()` returns no callback is
//! running and none will run until a listener is installed again.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::domain::ServiceStatus;

/// Receiver of one service's events
///
/// Callbacks run synchronously on the service task and must not block.
pub trait ServiceListener<T>: Send + Sync {
    fn on_status_change(&self, status: &ServiceStatus);

    fn on_update(&self, data: &T);

    /// Called once when the listener is removed by `stop()`
    fn detached(&self) {}
}

type Slot<T> = Mutex<Option<Arc<dyn ServiceListener<T>>>>;

fn lock<S>(slot: &Mutex<S>) -> MutexGuard<'_, S> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Two listener slots of one service
pub struct Dispatcher<T> {
    status_slot: Slot<T>,
    data_slot: Slot<T>,
}

impl<T> Default for Dispatcher<T> {
    fn default() -> Self {
        Self {
            status_slot: Mutex::new(None),
            data_slot: Mutex::new(None),
        }
    }
}

impl<T> Dispatcher<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install one listener in both slots
    pub fn set_listener(&self, listener: Arc<dyn ServiceListener<T>>) {
        *lock(&self.status_slot) = Some(Arc::clone(&listener));
        *lock(&self.data_slot) = Some(listener);
    }

    pub fn set_status_listener(&self, listener: Option<Arc<dyn ServiceListener<T>>>) {
        *lock(&self.status_slot) = listener;
    }

    pub fn set_data_listener(&self, listener: Option<Arc<dyn ServiceListener<T>>>) {
        *lock(&self.data_slot) = listener;
    }

    /// Empty both slots and return what they held, without notifying anyone
    pub fn take(&self) -> (Option<Arc<dyn ServiceListener<T>>>, Option<Arc<dyn ServiceListener<T>>>) {
        let status = lock(&self.status_slot).take();
        let data = lock(&self.data_slot).take();
        (status, data)
    }

    /// Put back listeners returned by [`Dispatcher::take`]
    pub fn restore(
        &self,
        listeners: (Option<Arc<dyn ServiceListener<T>>>, Option<Arc<dyn ServiceListener<T>>>),
    ) {
        let (status, data) = listeners;
        *lock(&self.status_slot) = status;
        *lock(&self.data_slot) = data;
    }

    /// Empty both slots and tell each removed listener it was detached
    pub fn clear(&self) {
        let (status, data) = self.take();

        if let Some(listener) = &status {
            listener.detached();
        }
        if let Some(listener) = data {
            let same = status.as_ref().map_or(false, |s| Arc::ptr_eq(s, &listener));
            if !same {
                listener.detached();
            }
        }
    }

    /// Deliver a status change; dropped silently when the slot is empty
    pub fn emit_status(&self, status: &ServiceStatus) {
        if let Some(listener) = lock(&self.status_slot).as_ref() {
            listener.on_status_change(status);
        }
    }

    /// Deliver a data update; dropped silently when the slot is empty
    pub fn emit_update(&self, data: &T) {
        if let Some(listener) = lock(&self.data_slot).as_ref() {
            listener.on_update(data);
        }
    }
}

/// Event carried by a [`ChannelListener`]
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent<T> {
    Status(ServiceStatus),
    Update(T),
}

/// Listener that forwards events into an unbounded channel
///
/// Detaching drops the sender, so the paired [`EventReceiver`] ends after
/// draining what was produced before `stop()` returned.
pub struct ChannelListener<T> {
    tx: Mutex<Option<mpsc::UnboundedSender<ServiceEvent<T>>>>,
}

impl<T: Clone + Send + 'static> ChannelListener<T> {
    /// Create a listener and its receiver
    pub fn channel() -> (Arc<Self>, EventReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = Arc::new(Self {
            tx: Mutex::new(Some(tx)),
        });
        (listener, EventReceiver { rx })
    }

    fn send(&self, event: ServiceEvent<T>) {
        if let Some(tx) = lock(&self.tx).as_ref() {
            // receiver gone means nobody is interested any more
            let _ = tx.send(event);
        }
    }
}

impl<T: Clone + Send + 'static> ServiceListener<T> for ChannelListener<T> {
    fn on_status_change(&self, status: &ServiceStatus) {
        self.send(ServiceEvent::Status(status.clone()));
    }

    fn on_update(&self, data: &T) {
        self.send(ServiceEvent::Update(data.clone()));
    }

    fn detached(&self) {
        lock(&self.tx).take();
    }
}

/// Receiving half of a [`ChannelListener`]
#[derive(Debug)]
pub struct EventReceiver<T> {
    rx: mpsc::UnboundedReceiver<ServiceEvent<T>>,
}

impl<T> EventReceiver<T> {
    /// Next event; `None` once the listener was detached and the queue is drained
    pub async fn recv(&mut self) -> Option<ServiceEvent<T>> {
        self.rx.recv().await
    }

    /// Next queued event without waiting
    pub fn try_recv(&mut self) -> Option<ServiceEvent<T>> {
        self.rx.try_recv().ok()
    }

    /// Drain everything queued right now
    pub fn drain(&mut self) -> Vec<ServiceEvent<T>> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConnectionState, RetryCounters};

    #[derive(Default)]
    struct Recorder {
        statuses: Mutex<Vec<ConnectionState>>,
        updates: Mutex<Vec<u32>>,
        detached: Mutex<u32>,
    }

    impl ServiceListener<u32> for Recorder {
        fn on_status_change(&self, status: &ServiceStatus) {
            self.statuses.lock().unwrap().push(status.state());
        }

        fn on_update(&self, data: &u32) {
            self.updates.lock().unwrap().push(*data);
        }

        fn detached(&self) {
            *self.detached.lock().unwrap() += 1;
        }
    }

    fn connected() -> ServiceStatus {
        ServiceStatus::initial("test").transition(ConnectionState::Connected, None, RetryCounters::default())
    }

    #[test]
    fn test_empty_slots_drop_events() {
        let dispatcher: Dispatcher<u32> = Dispatcher::new();
        dispatcher.emit_status(&connected());
        dispatcher.emit_update(&1);
        assert!(matches!(dispatcher.take(), (None, None)));
    }

    #[test]
    fn test_delivery_in_order() {
        let dispatcher: Dispatcher<u32> = Dispatcher::new();
        let recorder = Arc::new(Recorder::default());
        dispatcher.set_listener(recorder.clone());

        dispatcher.emit_status(&connected());
        dispatcher.emit_update(&7);
        dispatcher.emit_update(&8);

        assert_eq!(*recorder.statuses.lock().unwrap(), vec![ConnectionState::Connected]);
        assert_eq!(*recorder.updates.lock().unwrap(), vec![7, 8]);
    }

    #[test]
    fn test_clear_detaches_once_and_stops_delivery() {
        let dispatcher: Dispatcher<u32> = Dispatcher::new();
        let recorder = Arc::new(Recorder::default());
        dispatcher.set_listener(recorder.clone());

        dispatcher.clear();
        dispatcher.emit_update(&1);
        dispatcher.emit_status(&connected());

        assert!(recorder.updates.lock().unwrap().is_empty());
        assert!(recorder.statuses.lock().unwrap().is_empty());
        assert_eq!(*recorder.detached.lock().unwrap(), 1);
    }

    #[test]
    fn test_slots_clear_independently() {
        let dispatcher: Dispatcher<u32> = Dispatcher::new();
        let recorder = Arc::new(Recorder::default());
        dispatcher.set_listener(recorder.clone());
        dispatcher.set_status_listener(None);

        dispatcher.emit_status(&connected());
        dispatcher.emit_update(&3);

        assert!(recorder.statuses.lock().unwrap().is_empty());
        assert_eq!(*recorder.updates.lock().unwrap(), vec![3]);

        dispatcher.set_status_listener(Some(recorder.clone() as Arc<dyn ServiceListener<u32>>));
        dispatcher.set_data_listener(None);
        dispatcher.emit_status(&connected());
        dispatcher.emit_update(&4);

        assert_eq!(*recorder.statuses.lock().unwrap(), vec![ConnectionState::Connected]);
        assert_eq!(*recorder.updates.lock().unwrap(), vec![3]);
    }

    #[test]
    fn test_take_and_restore_keep_listener() {
        let dispatcher: Dispatcher<u32> = Dispatcher::new();
        let recorder = Arc::new(Recorder::default());
        dispatcher.set_listener(recorder.clone());

        let held = dispatcher.take();
        dispatcher.emit_update(&1);
        dispatcher.restore(held);
        dispatcher.emit_update(&2);

        assert_eq!(*recorder.updates.lock().unwrap(), vec![2]);
        assert_eq!(*recorder.detached.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_channel_listener_ends_after_detach() {
        let dispatcher: Dispatcher<u32> = Dispatcher::new();
        let (listener, mut rx) = ChannelListener::<u32>::channel();
        dispatcher.set_listener(listener);

        dispatcher.emit_update(&5);
        dispatcher.clear();
        dispatcher.emit_update(&6);

        assert_eq!(rx.recv().await, Some(ServiceEvent::Update(5)));
        assert_eq!(rx.recv().await, None);
    }
}
