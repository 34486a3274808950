//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use derive_new::new;
use serde::{Deserialize, Serialize};
use tether_utils::UnboundedSender;
use tether_utils::tether::{
    CallbackStarted, IpServingState, NetworkId, OffloadStatus, SupportedTypes,
    TetherError, TetherStates, TetheredClient, TetheringConfigSnapshot,
    TetheringInterface,
};

use crate::debug::Debug;

// Observer registration identifier, allocated by the API handle.
pub type CallbackId = usize;

// Identity cookie attached to an observer registration. It decides how much
// of each snapshot the observer is allowed to see.
#[derive(Clone, Copy, Debug, new)]
#[derive(Deserialize, Serialize)]
pub struct CallbackCookie {
    pub uid: u32,
    pub privileged: bool,
}

/// Events delivered to registered observers. Events for a single observer
/// arrive in the order they were generated by the event loop; no ordering is
/// guaranteed across observers.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum TetheringEvent {
    /// Full snapshot, delivered once upon registration.
    Started(Box<CallbackStarted>),
    SupportedTypes(SupportedTypes),
    Upstream(Option<NetworkId>),
    States(TetherStates),
    Clients(Vec<TetheredClient>),
    Offload(OffloadStatus),
    Configuration(TetheringConfigSnapshot),
}

pub type CallbackSender = UnboundedSender<TetheringEvent>;

// One downstream interface in the unfiltered internal state snapshot,
// alongside the data needed for per-observer filtering.
#[derive(Clone, Debug, new)]
pub struct StateEntry {
    pub iface: TetheringInterface,
    pub serving_uid: Option<u32>,
    pub state: IpServingState,
    pub last_error: TetherError,
}

#[derive(Debug, new)]
struct Subscriber {
    cookie: CallbackCookie,
    tx: CallbackSender,
}

// Registry of observer callbacks.
//
// The supported-types bitmap is published with release semantics so that
// the API handle can read it from any thread without posting to the loop.
#[derive(Debug)]
pub struct CallbackRegistry {
    subscribers: BTreeMap<CallbackId, Subscriber>,
    supported: Arc<AtomicU32>,
    last_offload: OffloadStatus,
    last_upstream: Option<NetworkId>,
}

// ===== impl CallbackRegistry =====

impl Default for CallbackRegistry {
    fn default() -> CallbackRegistry {
        CallbackRegistry {
            subscribers: BTreeMap::new(),
            supported: Arc::new(AtomicU32::new(0)),
            last_offload: OffloadStatus::Stopped,
            last_upstream: None,
        }
    }
}

impl CallbackRegistry {
    // Shared handle to the supported-types bitmap, readable from other
    // threads.
    pub fn supported_handle(&self) -> Arc<AtomicU32> {
        self.supported.clone()
    }

    pub fn supported_types(&self) -> SupportedTypes {
        SupportedTypes::from_bits_truncate(
            self.supported.load(Ordering::Acquire),
        )
    }

    pub fn last_offload(&self) -> OffloadStatus {
        self.last_offload
    }

    pub fn last_upstream(&self) -> Option<NetworkId> {
        self.last_upstream
    }

    // Registers an observer and delivers its started snapshot.
    pub fn register(
        &mut self,
        id: CallbackId,
        cookie: CallbackCookie,
        tx: CallbackSender,
        started: CallbackStarted,
    ) {
        Debug::CallbackRegistered(id).log();
        let _ = tx.send(TetheringEvent::Started(Box::new(started)));
        self.subscribers.insert(id, Subscriber::new(cookie, tx));
    }

    pub fn unregister(&mut self, id: CallbackId) {
        if self.subscribers.remove(&id).is_some() {
            Debug::CallbackUnregistered(id).log();
        }
    }

    // Publishes a new supported-types bitmap and notifies every observer.
    pub fn publish_supported(&mut self, supported: SupportedTypes) {
        self.supported.store(supported.bits(), Ordering::Release);
        self.broadcast(|_| TetheringEvent::SupportedTypes(supported));
    }

    // Reports a change of the current upstream network.
    pub fn report_upstream(&mut self, network: Option<NetworkId>) {
        self.last_upstream = network;
        self.broadcast(|_| TetheringEvent::Upstream(network));
    }

    // Reports a tether-states change, filtered per observer cookie.
    pub fn report_states(&mut self, entries: &[StateEntry]) {
        self.broadcast(|cookie| {
            TetheringEvent::States(filter_states(entries, cookie))
        });
    }

    // Reports the connected-client list. Only privileged observers see the
    // clients; the others receive an empty list.
    pub fn report_clients(&mut self, clients: &[TetheredClient]) {
        self.broadcast(|cookie| {
            let clients = if cookie.privileged {
                clients.to_vec()
            } else {
                Vec::new()
            };
            TetheringEvent::Clients(clients)
        });
    }

    // Reports an offload status change.
    pub fn report_offload(&mut self, status: OffloadStatus) {
        self.last_offload = status;
        self.broadcast(|_| TetheringEvent::Offload(status));
    }

    fn broadcast<F>(&self, event: F)
    where
        F: Fn(&CallbackCookie) -> TetheringEvent,
    {
        for subscriber in self.subscribers.values() {
            let _ = subscriber.tx.send(event(&subscriber.cookie));
        }
    }
}

// ===== global functions =====

// Builds the per-observer filtered tether-states snapshot: the soft-AP
// configuration of an interface is visible only to the requesting uid and
// to privileged observers.
pub(crate) fn filter_states(
    entries: &[StateEntry],
    cookie: &CallbackCookie,
) -> TetherStates {
    let mut states = TetherStates::default();

    for entry in entries {
        let mut iface = entry.iface.clone();
        let config_visible = cookie.privileged
            || entry.serving_uid.is_some_and(|uid| uid == cookie.uid);
        if !config_visible {
            iface.soft_ap_config = None;
        }

        if entry.last_error != TetherError::NoError {
            states.errored.push(iface);
            states.last_errors.push(entry.last_error);
            continue;
        }
        match entry.state {
            IpServingState::Available => states.available.push(iface),
            IpServingState::Tethered => states.tethered.push(iface),
            IpServingState::LocalOnly => states.local_only.push(iface),
            IpServingState::Unavailable => {}
        }
    }

    states
}

// ===== tests =====

#[cfg(test)]
mod tests {
    use tether_utils::tether::{ApBand, SoftApConfig, TetheringType};

    use super::*;

    fn entry(uid: Option<u32>) -> StateEntry {
        StateEntry::new(
            TetheringInterface {
                tethering_type: TetheringType::Wifi,
                ifname: "wlan0".to_owned(),
                soft_ap_config: Some(SoftApConfig {
                    ssid: "ap".to_owned(),
                    passphrase: None,
                    band: ApBand::Any,
                    hidden: false,
                }),
            },
            uid,
            IpServingState::Tethered,
            TetherError::NoError,
        )
    }

    // The soft-AP configuration is visible to the owning uid and to
    // privileged observers only.
    #[test]
    fn soft_ap_config_filtering() {
        let entries = [entry(Some(1000))];

        let owner = filter_states(&entries, &CallbackCookie::new(1000, false));
        assert!(owner.tethered[0].soft_ap_config.is_some());

        let system = filter_states(&entries, &CallbackCookie::new(0, true));
        assert!(system.tethered[0].soft_ap_config.is_some());

        let other = filter_states(&entries, &CallbackCookie::new(2000, false));
        assert!(other.tethered[0].soft_ap_config.is_none());
    }

    // Errored interfaces are reported in the errored list with their last
    // error, not in the per-state lists.
    #[test]
    fn errored_grouping() {
        let mut errored = entry(None);
        errored.last_error = TetherError::InternalError;
        let entries = [errored];

        let states = filter_states(&entries, &CallbackCookie::new(0, true));
        assert!(states.tethered.is_empty());
        assert_eq!(states.errored.len(), 1);
        assert_eq!(states.last_errors, vec![TetherError::InternalError]);
    }
}
