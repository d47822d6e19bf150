//! Live-mode listener registry and event fan-out.
//!
//! Listeners are notified in registration order, exactly once per effective
//! nominal-state transition; suspension never notifies. The broadcast
//! subscribers model the application-wide "live mode changed" event.

use log::warn;
use parking_lot::Mutex;
use std::sync::Arc;

/// Application-wide notification that nominal live mode changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveModeEvent {
    pub is_on: bool,
}

/// Callback interface for components that track live mode (toolbar buttons,
/// shutters, ...).
pub trait LiveModeListener: Send + Sync {
    fn live_mode_enabled(&self, is_on: bool);
}

type Subscriber = Box<dyn Fn(LiveModeEvent) + Send + Sync>;

pub(crate) struct EventHub {
    listeners: Mutex<Vec<Arc<dyn LiveModeListener>>>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a listener. Double registration is ignored so a listener is
    /// never notified twice for one transition.
    pub fn add_listener(&self, listener: Arc<dyn LiveModeListener>) {
        let mut listeners = self.listeners.lock();
        if listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            warn!("live-mode listener registered twice; ignoring");
            return;
        }
        listeners.push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn LiveModeListener>) {
        self.listeners.lock().retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn subscribe(&self, subscriber: impl Fn(LiveModeEvent) + Send + Sync + 'static) {
        self.subscribers.lock().push(Box::new(subscriber));
    }

    /// Notify listeners in registration order, then publish the broadcast
    /// event. Callbacks run outside the registry locks so they may register
    /// or remove listeners.
    pub fn notify(&self, is_on: bool) {
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener.live_mode_enabled(is_on);
        }
        let event = LiveModeEvent { is_on };
        let subscribers = self.subscribers.lock();
        for subscriber in subscribers.iter() {
            subscriber(event);
        }
    }
}
