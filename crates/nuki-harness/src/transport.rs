//! In-memory BLE transport
//!
//! Routes characteristic writes into a [`ScriptedLock`] and feeds its
//! responses back through the subscribed indication sinks, emulating the
//! GATT round trip without any radio.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use nuki_core::transport::{BleTransport, IndicationSink};
use nuki_core::types::BleAddress;

use crate::scripted_lock::{OutChannel, ScriptedLock};

pub struct MockTransport {
    peer: Arc<ScriptedLock>,
    gdio: Uuid,
    usdio: Uuid,
    connected: AtomicBool,
    /// Fail this many connect attempts before succeeding
    pub connect_failures: AtomicU32,
    /// When set, subscriptions fail until a refresh-services connect
    pub fail_subscribe_until_refresh: AtomicBool,
    connects: AtomicUsize,
    refresh_requests: AtomicUsize,
    bonding_requests: Mutex<Vec<(BleAddress, u32)>>,
    sinks: Mutex<HashMap<Uuid, IndicationSink>>,
    writes: Mutex<Vec<(Uuid, Vec<u8>)>>,
}

impl MockTransport {
    /// Build a transport in front of `peer`. `gdio` and `usdio` are the
    /// characteristic ids of the profile under test; they decide which
    /// sink a peer response is indicated on.
    pub fn new(peer: Arc<ScriptedLock>, gdio: Uuid, usdio: Uuid) -> Self {
        Self {
            peer,
            gdio,
            usdio,
            connected: AtomicBool::new(false),
            connect_failures: AtomicU32::new(0),
            fail_subscribe_until_refresh: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            refresh_requests: AtomicUsize::new(0),
            bonding_requests: Mutex::new(Vec::new()),
            sinks: Mutex::new(HashMap::new()),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Number of successful connect calls
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of connects requesting a service refresh
    pub fn refresh_request_count(&self) -> usize {
        self.refresh_requests.load(Ordering::SeqCst)
    }

    /// Recorded passkey bonding preparations
    pub fn bonding_requests(&self) -> Vec<(BleAddress, u32)> {
        self.bonding_requests.lock().unwrap().clone()
    }

    /// All characteristic writes seen so far
    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.writes.lock().unwrap().clone()
    }

    fn deliver(&self, responses: Vec<(OutChannel, Vec<u8>)>) {
        for (channel, frame) in responses {
            let characteristic = match channel {
                OutChannel::Gdio => self.gdio,
                OutChannel::Usdio => self.usdio,
            };
            let sink = self.sinks.lock().unwrap().get(&characteristic).cloned();
            match sink {
                Some(sink) => sink(characteristic, &frame),
                None => debug!(%characteristic, "response dropped, nothing subscribed"),
            }
        }
    }
}

#[async_trait]
impl BleTransport for MockTransport {
    async fn connect(&self, address: BleAddress, refresh_services: bool) -> bool {
        if refresh_services {
            self.refresh_requests.fetch_add(1, Ordering::SeqCst);
            self.fail_subscribe_until_refresh
                .store(false, Ordering::SeqCst);
        }
        if self.connect_failures.load(Ordering::SeqCst) > 0 {
            self.connect_failures.fetch_sub(1, Ordering::SeqCst);
            debug!(%address, "mock connect failing on purpose");
            return false;
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        true
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.sinks.lock().unwrap().clear();
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn rssi(&self) -> i16 {
        -55
    }

    async fn write_characteristic(
        &self,
        _service: Uuid,
        characteristic: Uuid,
        value: &[u8],
        _with_response: bool,
    ) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        self.writes
            .lock()
            .unwrap()
            .push((characteristic, value.to_vec()));

        let channel = if characteristic == self.gdio {
            OutChannel::Gdio
        } else if characteristic == self.usdio {
            OutChannel::Usdio
        } else {
            debug!(%characteristic, "write to unknown characteristic");
            return false;
        };
        let responses = self.peer.handle_write(channel, value);
        self.deliver(responses);
        true
    }

    async fn subscribe_indications(
        &self,
        _service: Uuid,
        characteristic: Uuid,
        sink: IndicationSink,
    ) -> bool {
        if self.fail_subscribe_until_refresh.load(Ordering::SeqCst) {
            debug!(%characteristic, "mock subscribe failing until refresh");
            return false;
        }
        self.sinks.lock().unwrap().insert(characteristic, sink);
        true
    }

    async fn prepare_passkey_bonding(&self, address: BleAddress, passkey: u32) -> bool {
        self.bonding_requests
            .lock()
            .unwrap()
            .push((address, passkey));
        true
    }
}
