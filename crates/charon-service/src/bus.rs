//! The service's bus identity and a process-scoped connection object.
//!
//! The bus transport itself lives outside this crate. What is modelled here
//! is everything the transport adapter needs: the three equal dotted strings
//! identifying the service, the session/system scope selection, and a signal
//! receiver registry with reference-counted disconnection, so that
//! connecting the same callback twice requires disconnecting it twice.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::wire::OutgoingMessage;

pub const SERVICE_NAME: &str = "nl.ultimaker.charon";
pub const OBJECT_PATH: &str = "/nl/ultimaker/charon";
pub const INTERFACE_NAME: &str = "nl.ultimaker.charon";

/// Which bus the service attaches to. Selected by `CHARON_USE_SESSION_BUS`:
/// the session bus when `"1"` (the default), the system bus otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusScope {
    Session,
    System,
}

impl BusScope {
    pub fn from_flag(use_session_bus: &str) -> Self {
        if use_session_bus == "1" {
            BusScope::Session
        } else {
            BusScope::System
        }
    }
}

pub type SignalCallback = Arc<dyn Fn(&OutgoingMessage) + Send + Sync>;

struct Receiver {
    callback: SignalCallback,
    /// How many times this callback was connected. Disconnecting decrements;
    /// the receiver is removed when the count reaches zero.
    count: usize,
}

/// A process-scoped connection: created once at bootstrap, shut down
/// explicitly, and threaded into whoever needs to publish signals.
pub struct BusConnection {
    scope: BusScope,
    receivers: Mutex<HashMap<String, Vec<Receiver>>>,
    open: Mutex<bool>,
}

impl BusConnection {
    pub fn init(scope: BusScope) -> Arc<Self> {
        tracing::info!(?scope, service = SERVICE_NAME, "bus connection initialised");
        Arc::new(BusConnection {
            scope,
            receivers: Mutex::new(HashMap::new()),
            open: Mutex::new(true),
        })
    }

    pub fn scope(&self) -> BusScope {
        self.scope
    }

    fn receivers(&self) -> MutexGuard<'_, HashMap<String, Vec<Receiver>>> {
        self.receivers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Connects a callback to a signal. Connecting the same callback again
    /// increments its reference count.
    pub fn add_signal_receiver(&self, signal: &str, callback: SignalCallback) {
        let mut receivers = self.receivers();
        let entries = receivers.entry(signal.to_string()).or_default();
        for entry in entries.iter_mut() {
            if Arc::ptr_eq(&entry.callback, &callback) {
                entry.count += 1;
                return;
            }
        }
        entries.push(Receiver { callback, count: 1 });
    }

    /// Disconnects one reference to a callback. The callback keeps firing
    /// until as many disconnects as connects have been seen. Returns whether
    /// the callback was known.
    pub fn remove_signal_receiver(&self, signal: &str, callback: &SignalCallback) -> bool {
        let mut receivers = self.receivers();
        let Some(entries) = receivers.get_mut(signal) else {
            return false;
        };
        for (index, entry) in entries.iter_mut().enumerate() {
            if Arc::ptr_eq(&entry.callback, callback) {
                entry.count -= 1;
                if entry.count == 0 {
                    entries.remove(index);
                }
                return true;
            }
        }
        false
    }

    /// Delivers a signal to every connected receiver.
    pub fn emit(&self, message: &OutgoingMessage) {
        if !*self.open.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) {
            tracing::debug!("dropping signal emitted after shutdown");
            return;
        }
        let receivers = self.receivers();
        if let Some(entries) = receivers.get(message.signal_name()) {
            for entry in entries {
                (entry.callback)(message);
            }
        }
    }

    /// Marks the connection closed. Signals emitted afterwards are dropped.
    pub fn shutdown(&self) {
        *self.open.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = false;
        self.receivers().clear();
        tracing::info!(service = SERVICE_NAME, "bus connection shut down");
    }
}
