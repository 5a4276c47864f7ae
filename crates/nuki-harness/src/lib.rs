//! Test harness for the Nuki protocol engine
//!
//! Provides the pieces integration tests wire together instead of real
//! Bluetooth: a [`ScriptedLock`] that speaks the genuine wire protocol
//! (same key agreement, same frames), a [`MockTransport`] that shuttles
//! writes and indications between client and scripted peer, a
//! [`FakeScanner`] for injecting advertisements and an [`EventCollector`]
//! sink.

mod scanner;
mod scripted_lock;
mod transport;

pub use scanner::{EventCollector, FakeScanner};
pub use scripted_lock::{Reply, ScriptedLock};
pub use transport::MockTransport;
