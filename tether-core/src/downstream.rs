//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use tether_utils::ipserver::{
    IpServerEventSender, IpServerFactory, IpServerHandle, IpServerId,
};
use tether_utils::tether::{IpServingState, TetherError, TetheringType};

use crate::debug::Debug;

// A downstream interface with an active IP server.
#[derive(Debug)]
pub struct Downstream {
    pub server: IpServerHandle,
    pub last_state: IpServingState,
    pub last_error: TetherError,
    // Meaningful only for the USB and NCM types.
    pub is_ncm: bool,
    pub state_changes: u32,
}

// Registry of downstream interfaces, keyed by interface name.
//
// An entry exists iff an IP server has been started for the interface and
// not yet torn down. IP server identifiers increase monotonically and are
// never reused, so callbacks from a replaced server are detectable.
#[derive(Debug, Default)]
pub struct Downstreams {
    entries: BTreeMap<String, Downstream>,
    next_id: IpServerId,
}

// ===== impl Downstreams =====

impl Downstreams {
    // Starts an IP server for the interface if one isn't running yet.
    // Idempotent: an existing entry is left untouched.
    pub(crate) fn ensure_started(
        &mut self,
        ifname: &str,
        tethering_type: TetheringType,
        is_ncm: bool,
        factory: &mut dyn IpServerFactory,
        event_tx: &IpServerEventSender,
    ) -> IpServerId {
        if let Some(downstream) = self.entries.get(ifname) {
            return downstream.server.id;
        }

        let id = self.next_id;
        self.next_id += 1;

        let server =
            factory.create(id, ifname, tethering_type, is_ncm, event_tx.clone());
        Debug::IpServerStarted(ifname, tethering_type).log();
        server.start();

        self.entries.insert(
            ifname.to_owned(),
            Downstream {
                server,
                last_state: IpServingState::Available,
                last_error: TetherError::NoError,
                is_ncm,
                state_changes: 0,
            },
        );
        id
    }

    // Tears down the IP server of the interface, if any. Idempotent.
    // Returns the stopped server's identifier so the caller can drop its
    // serving request.
    pub(crate) fn ensure_stopped(&mut self, ifname: &str) -> Option<IpServerId> {
        let downstream = self.entries.remove(ifname)?;
        Debug::IpServerStopped(ifname).log();
        downstream.server.stop();
        Some(downstream.server.id)
    }

    // Drops the registry entry without commanding the server; used when the
    // server reported itself unavailable and is already gone.
    pub(crate) fn remove_entry(&mut self, ifname: &str) -> Option<Downstream> {
        self.entries.remove(ifname)
    }

    // Returns a reference to the downstream of the given interface.
    pub fn get(&self, ifname: &str) -> Option<&Downstream> {
        self.entries.get(ifname)
    }

    // Returns a mutable reference to the downstream of the given interface.
    pub fn get_mut(&mut self, ifname: &str) -> Option<&mut Downstream> {
        self.entries.get_mut(ifname)
    }

    // Returns the downstream driven by the given IP server.
    pub fn get_by_id(&self, id: IpServerId) -> Option<(&str, &Downstream)> {
        self.entries
            .iter()
            .find(|(_, downstream)| downstream.server.id == id)
            .map(|(ifname, downstream)| (ifname.as_str(), downstream))
    }

    // Returns the interfaces currently tethered for the given type.
    pub fn interfaces_of_type(
        &self,
        tethering_type: TetheringType,
    ) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, downstream)| {
                downstream.server.tethering_type == tethering_type
            })
            .map(|(ifname, _)| ifname.clone())
            .collect()
    }

    // Returns the distinct types with at least one active downstream.
    pub fn active_types(&self) -> Vec<TetheringType> {
        let mut types = self
            .entries
            .values()
            .map(|downstream| downstream.server.tethering_type)
            .collect::<Vec<_>>();
        types.sort();
        types.dedup();
        types
    }

    // Returns an iterator visiting all downstreams, ordered by interface
    // name.
    pub fn iter(&self) -> impl Iterator<Item = (&'_ str, &'_ Downstream)> + '_ {
        self.entries
            .iter()
            .map(|(ifname, downstream)| (ifname.as_str(), downstream))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
