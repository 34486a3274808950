//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tether_utils::ibus::{UsbFunction, UsbState};
use tether_utils::tether::{TetherError, TetheringRequest, TetheringType};

use crate::error::Error;
use crate::links::enable_ip_serving;
use crate::master::Master;

// ===== global functions =====

// Activates the gadget function matching the request's type. Success is
// reported synchronously; serving follows the USB state change.
pub(crate) fn start(
    master: &mut Master,
    request: &TetheringRequest,
) -> TetherError {
    let function = match request.tethering_type {
        TetheringType::Ncm => UsbFunction::Ncm,
        _ => UsbFunction::Rndis,
    };
    master.links.usb_set_function(Some(function));
    TetherError::NoError
}

pub(crate) fn stop(master: &mut Master, _tethering_type: TetheringType) {
    master.links.usb_set_function(None);
}

// USB gadget state change callback.
pub(crate) fn process_usb_state(master: &mut Master, state: UsbState) {
    match state {
        UsbState::Configured { function } => {
            let tethering_type = match function {
                UsbFunction::Rndis => TetheringType::Usb,
                UsbFunction::Ncm => TetheringType::Ncm,
            };
            match find_matching_interface(master, tethering_type) {
                Some(ifname) => {
                    let request =
                        master.tracker.get_or_create_pending(tethering_type);
                    enable_ip_serving(
                        master,
                        request,
                        &ifname,
                        function == UsbFunction::Ncm,
                    );
                }
                None => {
                    Error::NoTetherableInterface(tethering_type).log();
                }
            }
        }
        UsbState::Disconnected => {
            for tethering_type in [TetheringType::Usb, TetheringType::Ncm] {
                for ifname in
                    master.downstreams.interfaces_of_type(tethering_type)
                {
                    master.ensure_ip_server_stopped(&ifname);
                }
            }
        }
    }
}

// Enumerates the kernel interfaces and returns the first one matching the
// type's configured patterns.
fn find_matching_interface(
    master: &mut Master,
    tethering_type: TetheringType,
) -> Option<String> {
    let ifaces = match master.netd.interface_get_list() {
        Ok(ifaces) => ifaces,
        Err(error) => {
            Error::NetdCall {
                verb: "interfaceGetList",
                error,
            }
            .log();
            return None;
        }
    };

    ifaces
        .into_iter()
        .find(|ifname| master.config.interface_matches(ifname, tethering_type))
}
