//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tether_utils::ibus::{IbusMsg, UpstreamEvent};
use tether_utils::ipserver::{IpServerEvent, IpServerEventMsg};
use tether_utils::tether::{IpServingState, SupportedTypes, TetherError};

use crate::api;
use crate::debug::Debug;
use crate::links::{bluetooth, ethernet, usb, wifi};
use crate::master::Master;
use crate::tasks::TimerMsg;
use crate::tether_sm::Event;

// ===== global functions =====

// Processes a single bus notification.
pub(crate) fn process_ibus_msg(master: &mut Master, msg: IbusMsg) {
    match msg {
        IbusMsg::WifiApState(state) => {
            wifi::process_ap_state(master, state);
        }
        IbusMsg::WifiP2pGroup {
            group_owner,
            ifname,
        } => {
            wifi::process_p2p_group(master, group_owner, ifname);
        }
        IbusMsg::UsbState(state) => {
            usb::process_usb_state(master, state);
        }
        IbusMsg::BluetoothPan(event) => {
            bluetooth::process_pan_event(master, event);
        }
        IbusMsg::DownstreamIface {
            tethering_type,
            event,
        } => {
            ethernet::process_iface_event(master, tethering_type, event);
        }
        IbusMsg::Upstream(event) => {
            process_upstream_event(master, event);
        }
        IbusMsg::UserRestriction { disallow_tethering } => {
            let data_saver = master.data_saver;
            update_restriction(master, disallow_tethering, data_saver);
        }
        IbusMsg::DataSaver { enabled } => {
            let restricted = master.restricted;
            update_restriction(master, restricted, enabled);
        }
    }
}

// Processes a single IP server callback.
pub(crate) fn process_ipserver_msg(master: &mut Master, msg: IpServerEventMsg) {
    let IpServerEventMsg { id, ifname, event } = msg;

    match event {
        IpServerEvent::StateChanged { state, last_error } => {
            // Stale messages from a replaced server may arise during rapid
            // restart; drop them.
            {
                let Some(downstream) = master.downstreams.get_mut(&ifname)
                else {
                    Debug::StaleIpServerEvent(&ifname, id).log();
                    return;
                };
                if downstream.server.id != id {
                    Debug::StaleIpServerEvent(&ifname, id).log();
                    return;
                }
                downstream.last_state = state;
                downstream.last_error = last_error;
                downstream.state_changes += 1;
            }

            if state.is_serving() {
                master.dispatch_sm(Event::ServingActive {
                    server: id,
                    mode: state,
                });
            } else {
                // Leaving serving because of an error drops the serving
                // request.
                if last_error != TetherError::NoError {
                    master.tracker.remove_serving(id);
                }
                master.dispatch_sm(Event::ServingInactive { server: id });

                if state == IpServingState::Unavailable {
                    // The server is gone; stop tracking the interface.
                    master.downstreams.remove_entry(&ifname);
                    master.tracker.remove_serving(id);
                    master.clients.remove(&ifname);
                }
            }

            if last_error == TetherError::InternalError {
                master.dispatch_sm(Event::ClearError { server: id });
            }

            master.report_state_change();
        }
        IpServerEvent::LinkPropertiesChanged(lp) => {
            let Some(downstream) = master.downstreams.get(&ifname) else {
                return;
            };
            if downstream.server.id != id {
                return;
            }
            let state = downstream.last_state;
            master.dispatch_sm(Event::IfaceUpdateLinkProperties { state, lp });
        }
        IpServerEvent::DhcpLeasesChanged { clients } => {
            let Some(downstream) = master.downstreams.get(&ifname) else {
                return;
            };
            if downstream.server.id != id {
                return;
            }
            master.clients.insert(ifname, clients);
            let clients = master.all_clients();
            master.callbacks.report_clients(&clients);
        }
        IpServerEvent::RequestEnableTethering {
            tethering_type,
            enable,
        } => {
            master.dispatch_sm(Event::RequestChangeDownstream {
                tethering_type,
                enable,
            });
        }
    }
}

// Processes a timer expiry.
pub(crate) fn process_timer_msg(master: &mut Master, msg: TimerMsg) {
    match msg {
        TimerMsg::RetryUpstream => {
            master.retry_timer = None;
            master.dispatch_sm(Event::RetryUpstream);
        }
    }
}

// ===== helper functions =====

// Folds the selector notification into the cache, then lets the state
// machine decide whether to re-run upstream selection.
fn process_upstream_event(master: &mut Master, event: UpstreamEvent) {
    master.upstream.update(&event);

    let sm_event = match event {
        UpstreamEvent::Changed(..) => Event::UpstreamChanged,
        UpstreamEvent::PermissionChanged => Event::UpstreamPermissionChanged,
        event => Event::UpstreamCallback(event),
    };
    master.dispatch_sm(sm_event);
}

// A user restriction or data saver blocks tethering entirely: the
// supported-types bitmap reads empty and everything active is stopped.
fn update_restriction(master: &mut Master, restricted: bool, data_saver: bool) {
    let was_blocked = master.restricted || master.data_saver;
    master.restricted = restricted;
    master.data_saver = data_saver;
    let blocked = master.restricted || master.data_saver;

    if blocked == was_blocked {
        return;
    }
    if blocked {
        master.callbacks.publish_supported(SupportedTypes::empty());
        api::stop_all_tethering(master);
    } else {
        master
            .callbacks
            .publish_supported(master.config.supported_types());
    }
}
