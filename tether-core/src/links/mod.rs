//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod bluetooth;
pub mod ethernet;
pub mod usb;
pub mod wifi;

use tether_utils::tether::{
    RequestType, TetherError, TetheringRequest, TetheringType,
};

use crate::debug::Debug;
use crate::master::Master;

// ===== global functions =====

// Hands a freshly accepted request to its link adapter. Returns `NoError`
// for the synchronously-succeeding types, one of the internal pending
// sentinels for the asynchronous ones, or a real error.
pub(crate) fn start(
    master: &mut Master,
    request: &TetheringRequest,
) -> TetherError {
    match request.tethering_type {
        TetheringType::Wifi | TetheringType::Wigig => {
            wifi::start(master, request)
        }
        TetheringType::WifiP2p => {
            // P2P serving is implicit (driven by group ownership); an
            // explicit start has nothing to do.
            TetherError::NoError
        }
        TetheringType::Usb | TetheringType::Ncm => usb::start(master, request),
        TetheringType::Bluetooth => bluetooth::start(master),
        TetheringType::Ethernet | TetheringType::Virtual => {
            ethernet::start(master, request)
        }
    }
}

// Invokes the disable path of the type, using a placeholder request where
// the adapter needs one.
pub(crate) fn disable(master: &mut Master, tethering_type: TetheringType) {
    match tethering_type {
        TetheringType::Wifi | TetheringType::Wigig => wifi::stop(master),
        TetheringType::WifiP2p => wifi::stop_p2p(master),
        TetheringType::Usb | TetheringType::Ncm => {
            usb::stop(master, tethering_type)
        }
        TetheringType::Bluetooth => bluetooth::stop(master),
        TetheringType::Ethernet | TetheringType::Virtual => {
            ethernet::stop(master, tethering_type)
        }
    }
}

// Common serving activation: make sure an IP server runs on the interface,
// promote the request and enable IP serving.
pub(crate) fn enable_ip_serving(
    master: &mut Master,
    request: TetheringRequest,
    ifname: &str,
    is_ncm: bool,
) {
    if request.request_type == RequestType::Placeholder {
        // Unexpected, but serving must proceed anyway.
        Debug::PlaceholderEnabled(ifname).log();
    }

    // Displace a serving entry conflicting under the uniqueness rule.
    if let Some(conflict) = master.tracker.find_serving_conflict(&request) {
        let conflict_ifname = master
            .downstreams
            .get_by_id(conflict)
            .map(|(name, _)| name.to_owned());
        if let Some(conflict_ifname) = conflict_ifname
            && conflict_ifname != ifname
        {
            master.ensure_ip_server_unwanted(conflict);
        }
    }

    let id = master.downstreams.ensure_started(
        ifname,
        request.tethering_type,
        is_ncm,
        master.factory.as_mut(),
        &master.ipserver_tx,
    );
    master.tracker.promote_to_serving(id, request.clone());
    master.tracker.remove_all_pending(request.tethering_type);
    if let Some(downstream) = master.downstreams.get(ifname) {
        downstream.server.enable(request);
    }
    master.report_state_change();
}
