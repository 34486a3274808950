//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tether_utils::ibus::WifiApState;
use tether_utils::tether::{
    ConnectivityScope, RequestType, TetherError, TetheringRequest,
    TetheringType,
};

use crate::api::{self, ResultListener};
use crate::links::enable_ip_serving;
use crate::master::Master;

// Wi-Fi adapter state: the soft-AP result listener parked until the Wi-Fi
// layer reports the outcome, and the interface of the active P2P group.
#[derive(Debug, Default)]
pub struct WifiAdapter {
    pending_listener: Option<ResultListener>,
    p2p_ifname: Option<String>,
}

// ===== global functions =====

// Asks the Wi-Fi layer to bring the soft AP up. The result is asynchronous:
// it arrives through the soft-AP state callback.
pub(crate) fn start(
    master: &mut Master,
    request: &TetheringRequest,
) -> TetherError {
    master.links.wifi_start_soft_ap(request.soft_ap_config.clone());
    TetherError::SoftApCallbackPending
}

pub(crate) fn stop(master: &mut Master) {
    master.links.wifi_stop_soft_ap();
}

// P2P serving is torn down directly; there is no hotspot to stop.
pub(crate) fn stop_p2p(master: &mut Master) {
    if let Some(ifname) = master.wifi.p2p_ifname.take() {
        master.ensure_ip_server_stopped(&ifname);
    }
}

// Parks the start listener until the soft-AP callback fires. A listener
// already parked is failed: its start attempt has been superseded.
pub(crate) fn store_pending_listener(
    master: &mut Master,
    listener: Option<ResultListener>,
) {
    if let Some(old) = master.wifi.pending_listener.take() {
        api::reply(old, TetherError::InternalError);
    }
    master.wifi.pending_listener = listener;
}

fn resolve_pending_listener(master: &mut Master, result: TetherError) {
    if let Some(listener) = master.wifi.pending_listener.take() {
        api::reply(listener, result);
    }
}

// Soft-AP state callback.
pub(crate) fn process_ap_state(master: &mut Master, state: WifiApState) {
    match state {
        WifiApState::Enabled { ifname } => {
            let request =
                master.tracker.get_or_create_pending(TetheringType::Wifi);
            enable_ip_serving(master, request, &ifname, false);
            resolve_pending_listener(master, TetherError::NoError);
        }
        WifiApState::Failed => {
            master.tracker.remove_all_pending(TetheringType::Wifi);
            resolve_pending_listener(master, TetherError::InternalError);
        }
        WifiApState::Disabled { ifname } => {
            match ifname {
                Some(ifname) => master.ensure_ip_server_stopped(&ifname),
                None => {
                    for ifname in master
                        .downstreams
                        .interfaces_of_type(TetheringType::Wifi)
                    {
                        master.ensure_ip_server_stopped(&ifname);
                    }
                }
            }
        }
    }
}

// P2P connection change callback. Serving follows group ownership: an
// implicit local-only request while the device owns a group, teardown
// otherwise. A group moving to a new interface tears the old one down
// first.
pub(crate) fn process_p2p_group(
    master: &mut Master,
    group_owner: bool,
    ifname: Option<String>,
) {
    if group_owner && let Some(ifname) = ifname {
        if let Some(old) = master.wifi.p2p_ifname.clone()
            && old != ifname
        {
            master.ensure_ip_server_stopped(&old);
        }
        master.wifi.p2p_ifname = Some(ifname.clone());

        let request = TetheringRequest {
            tethering_type: TetheringType::WifiP2p,
            connectivity_scope: ConnectivityScope::Local,
            soft_ap_config: None,
            interface_name: Some(ifname.clone()),
            exempt_from_entitlement_check: false,
            show_entitlement_ui: false,
            request_type: RequestType::Implicit,
            uid: None,
            package_name: None,
        };
        enable_ip_serving(master, request, &ifname, false);
    } else if let Some(old) = master.wifi.p2p_ifname.take() {
        master.ensure_ip_server_stopped(&old);
    }
}
