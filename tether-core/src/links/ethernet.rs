//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tether_utils::ibus::IfaceEvent;
use tether_utils::tether::{TetherError, TetheringRequest, TetheringType};

use crate::error::Error;
use crate::links::enable_ip_serving;
use crate::master::Master;

// Ethernet and virtual downstreams share the interface-handle model: the
// platform glue opens a handle on request and reports the interface's
// availability.

// ===== global functions =====

pub(crate) fn start(
    master: &mut Master,
    request: &TetheringRequest,
) -> TetherError {
    master.links.ethernet_request(request.tethering_type);
    TetherError::NoError
}

pub(crate) fn stop(master: &mut Master, tethering_type: TetheringType) {
    master.links.ethernet_release(tethering_type);
}

// Interface availability callback.
pub(crate) fn process_iface_event(
    master: &mut Master,
    tethering_type: TetheringType,
    event: IfaceEvent,
) {
    match event {
        IfaceEvent::Available { ifname } => {
            // Virtual downstreams carry no name patterns; everything else
            // must match its configured set.
            if tethering_type != TetheringType::Virtual
                && master.config.type_for_interface(&ifname)
                    != Some(tethering_type)
            {
                Error::UntetherableInterface(ifname).log();
                return;
            }
            let request =
                master.tracker.get_or_create_pending(tethering_type);
            enable_ip_serving(master, request, &ifname, false);
        }
        IfaceEvent::Unavailable { ifname } => {
            master.ensure_ip_server_stopped(&ifname);
        }
    }
}
