//! Fake scan publisher and event sink

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use nuki_core::transport::{Advertisement, EventHandler, NukiEvent, ScanListener, ScanPublisher};

// ----------------------------------------------------------------------------
// Scanner
// ----------------------------------------------------------------------------

/// Scan publisher tests drive by hand
#[derive(Default)]
pub struct FakeScanner {
    listeners: Mutex<Vec<Arc<dyn ScanListener>>>,
    scanning: AtomicBool,
}

impl FakeScanner {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            scanning: AtomicBool::new(true),
        }
    }

    /// Deliver one advertisement to every subscriber
    pub fn publish(&self, advertisement: &Advertisement) {
        let listeners = self.listeners.lock().unwrap().clone();
        for listener in listeners {
            listener.on_advertisement(advertisement);
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }
}

impl ScanPublisher for FakeScanner {
    fn subscribe(&self, listener: Arc<dyn ScanListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    fn unsubscribe(&self, listener: &Arc<dyn ScanListener>) {
        self.listeners
            .lock()
            .unwrap()
            .retain(|existing| !Arc::ptr_eq(existing, listener));
    }

    fn enable_scanning(&self, enable: bool) {
        self.scanning.store(enable, Ordering::SeqCst);
    }
}

// ----------------------------------------------------------------------------
// Event sink
// ----------------------------------------------------------------------------

/// Collects emitted events for assertions
#[derive(Default)]
pub struct EventCollector {
    events: Mutex<Vec<NukiEvent>>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NukiEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: NukiEvent) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|&&seen| seen == event)
            .count()
    }
}

impl EventHandler for EventCollector {
    fn notify(&self, event: NukiEvent) {
        self.events.lock().unwrap().push(event);
    }
}
