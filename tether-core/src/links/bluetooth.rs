//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tether_utils::ibus::PanEvent;
use tether_utils::tether::{TetherError, TetheringType};

use crate::api::{self, ResultListener};
use crate::links::enable_ip_serving;
use crate::master::Master;

// Bluetooth adapter state. Binding to the PAN profile is deferred until the
// first start; while the bind is in flight exactly one result listener may
// be parked.
#[derive(Debug, Default)]
pub struct BluetoothAdapter {
    bound: bool,
    binding: bool,
    pending_listener: Option<ResultListener>,
}

// ===== global functions =====

pub(crate) fn start(master: &mut Master) -> TetherError {
    if master.bluetooth.bound {
        master.links.bluetooth_set_pan_tethering(true);
        return TetherError::NoError;
    }
    if master.bluetooth.binding {
        // Only one start may wait for the bind.
        return TetherError::ServiceUnavail;
    }

    master.bluetooth.binding = true;
    master.links.bluetooth_bind_pan();
    TetherError::BluetoothServicePending
}

pub(crate) fn stop(master: &mut Master) {
    if master.bluetooth.bound {
        master.links.bluetooth_set_pan_tethering(false);
    }
    // A stop racing the pending bind drops the parked start.
    resolve_pending_listener(master, TetherError::ServiceUnavail);
    for ifname in master
        .downstreams
        .interfaces_of_type(TetheringType::Bluetooth)
    {
        master.ensure_ip_server_stopped(&ifname);
    }
}

pub(crate) fn store_pending_listener(
    master: &mut Master,
    listener: Option<ResultListener>,
) {
    if let Some(old) = master.bluetooth.pending_listener.take() {
        api::reply(old, TetherError::InternalError);
    }
    master.bluetooth.pending_listener = listener;
}

fn resolve_pending_listener(master: &mut Master, result: TetherError) {
    if let Some(listener) = master.bluetooth.pending_listener.take() {
        api::reply(listener, result);
    }
}

// PAN profile event callback.
pub(crate) fn process_pan_event(master: &mut Master, event: PanEvent) {
    match event {
        PanEvent::ServiceConnected => {
            master.bluetooth.binding = false;
            master.bluetooth.bound = true;
            // Enable tethering on the proxy only when the start that caused
            // the bind is still wanted.
            let still_wanted = master.bluetooth.pending_listener.is_some()
                || master
                    .tracker
                    .next_pending(TetheringType::Bluetooth)
                    .is_some();
            if still_wanted {
                master.links.bluetooth_set_pan_tethering(true);
                resolve_pending_listener(master, TetherError::NoError);
            }
        }
        PanEvent::ServiceDisconnected => {
            master.bluetooth.binding = false;
            master.bluetooth.bound = false;
            resolve_pending_listener(master, TetherError::ServiceUnavail);
            for ifname in master
                .downstreams
                .interfaces_of_type(TetheringType::Bluetooth)
            {
                master.ensure_ip_server_stopped(&ifname);
            }
        }
        PanEvent::InterfaceAvailable { ifname } => {
            let request = master
                .tracker
                .get_or_create_pending(TetheringType::Bluetooth);
            enable_ip_serving(master, request, &ifname, false);
        }
    }
}
