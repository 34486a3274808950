//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeSet, HashMap};

use futures::StreamExt;
use futures::TryStreamExt;
use futures::channel::mpsc::UnboundedReceiver;
use netlink_packet_core::{NetlinkMessage, NetlinkPayload};
use netlink_packet_route::RouteNetlinkMessage;
use netlink_packet_route::link::{LinkAttribute, LinkMessage, State};
use netlink_packet_route::route::{RouteAttribute, RouteMessage};
use rtnetlink::sys::{AsyncSocket, SocketAddr};
use rtnetlink::{Handle, RouteMessageBuilder, new_connection};
use tether_core::config::TetheringConfig;
use tether_utils::ibus::{
    BluetoothCmd, EthernetCmd, IbusMsg, IbusSender, IfaceEvent, LinkChannelsRx,
    UpstreamCmd, UpstreamEvent, UsbCmd, UsbFunction, UsbState, WifiCmd,
};
use tether_utils::tether::{NetworkId, TetheringType, UpstreamNetwork};
use tracing::{Instrument, debug, debug_span, trace};

pub type NetlinkMonitor =
    UnboundedReceiver<(NetlinkMessage<RouteNetlinkMessage>, SocketAddr)>;

// Link and default-route watcher feeding the control plane's bus.
//
// This is also where the link-layer command channels terminate: Ethernet
// and virtual interface handles are tracked here, while the Wi-Fi, USB and
// Bluetooth commands belong to platform services (logged when no service is
// registered, as on a bare test box).
struct Monitor {
    config: TetheringConfig,
    ibus_tx: IbusSender,
    // Known links, keyed by ifindex.
    links: HashMap<u32, LinkState>,
    // Downstream types with an open interface handle.
    requested: BTreeSet<TetheringType>,
    // Current IPv4 default route upstream, if any.
    upstream: Option<UpstreamNetwork>,
    observing: bool,
}

#[derive(Debug)]
struct LinkState {
    name: String,
    running: bool,
}

// ===== impl Monitor =====

impl Monitor {
    async fn run(
        &mut self,
        mut monitor_rx: NetlinkMonitor,
        mut links_rx: LinkChannelsRx,
    ) {
        loop {
            tokio::select! {
                Some((msg, _)) = monitor_rx.next() => {
                    self.process_msg(msg);
                }
                Some(cmd) = links_rx.ethernet.recv() => {
                    self.process_ethernet_cmd(cmd);
                }
                Some(cmd) = links_rx.upstream.recv() => {
                    self.process_upstream_cmd(cmd);
                }
                Some(cmd) = links_rx.usb.recv() => {
                    self.process_usb_cmd(cmd);
                }
                Some(cmd) = links_rx.wifi.recv() => {
                    self.process_wifi_cmd(cmd);
                }
                Some(cmd) = links_rx.bluetooth.recv() => {
                    self.process_bluetooth_cmd(cmd);
                }
                else => return,
            }
        }
    }

    fn process_msg(&mut self, msg: NetlinkMessage<RouteNetlinkMessage>) {
        if let NetlinkPayload::InnerMessage(msg) = msg.payload {
            match msg {
                RouteNetlinkMessage::NewLink(msg) => {
                    self.process_newlink_msg(msg, true);
                }
                RouteNetlinkMessage::DelLink(msg) => {
                    self.process_dellink_msg(msg);
                }
                RouteNetlinkMessage::NewRoute(msg) => {
                    self.process_newroute_msg(msg, true);
                }
                RouteNetlinkMessage::DelRoute(msg) => {
                    self.process_delroute_msg(msg);
                }
                _ => (),
            }
        }
    }

    fn process_newlink_msg(&mut self, msg: LinkMessage, notify: bool) {
        trace!("received RTM_NEWLINK message");

        let ifindex = msg.header.index;
        let mut ifname = None;
        let mut oper_state = State::Unknown;
        for attr in msg.attributes.into_iter() {
            match attr {
                LinkAttribute::IfName(attr_ifname) => {
                    ifname = Some(attr_ifname);
                }
                LinkAttribute::OperState(attr_state) => {
                    oper_state = attr_state;
                }
                _ => (),
            }
        }
        let Some(ifname) = ifname else {
            return;
        };
        // Gadget and point-to-point interfaces commonly report "unknown".
        let running = matches!(oper_state, State::Up | State::Unknown);

        let was_running = self
            .links
            .insert(
                ifindex,
                LinkState {
                    name: ifname.clone(),
                    running,
                },
            )
            .is_some_and(|old| old.running);

        if notify && running && !was_running {
            self.link_came_up(&ifname);
        }
    }

    fn process_dellink_msg(&mut self, msg: LinkMessage) {
        trace!("received RTM_DELLINK message");

        let Some(link) = self.links.remove(&msg.header.index) else {
            return;
        };
        self.link_went_down(&link.name);
    }

    fn process_newroute_msg(&mut self, msg: RouteMessage, notify: bool) {
        if !is_default_route(&msg) {
            return;
        }
        trace!("received default route");

        let Some(oif) = oif_from_message(&msg) else {
            return;
        };
        let Some(link) = self.links.get(&oif) else {
            return;
        };

        let upstream = UpstreamNetwork {
            network: NetworkId(oif),
            ifname: link.name.clone(),
            stacked: Vec::new(),
            // DNS is left to the configured forwarder defaults.
            dns_servers: Vec::new(),
        };
        if self.upstream.as_ref() == Some(&upstream) {
            return;
        }
        self.upstream = Some(upstream.clone());
        if notify && self.observing {
            self.send(IbusMsg::Upstream(UpstreamEvent::Changed(Some(
                upstream,
            ))));
        }
    }

    fn process_delroute_msg(&mut self, msg: RouteMessage) {
        if !is_default_route(&msg) {
            return;
        }
        let Some(current) = self.upstream.take() else {
            return;
        };
        debug!(ifname = %current.ifname, "default route lost");
        if self.observing {
            self.send(IbusMsg::Upstream(UpstreamEvent::Lost(current.network)));
        }
    }

    // A link turned operational: report gadget interfaces and requested
    // downstream handles.
    fn link_came_up(&mut self, ifname: &str) {
        match self.config.type_for_interface(ifname) {
            Some(TetheringType::Usb) => {
                self.send(IbusMsg::UsbState(UsbState::Configured {
                    function: UsbFunction::Rndis,
                }));
            }
            Some(TetheringType::Ncm) => {
                self.send(IbusMsg::UsbState(UsbState::Configured {
                    function: UsbFunction::Ncm,
                }));
            }
            Some(tethering_type)
                if self.requested.contains(&tethering_type) =>
            {
                self.send(IbusMsg::DownstreamIface {
                    tethering_type,
                    event: IfaceEvent::Available {
                        ifname: ifname.to_owned(),
                    },
                });
            }
            _ => (),
        }
    }

    fn link_went_down(&mut self, ifname: &str) {
        match self.config.type_for_interface(ifname) {
            Some(TetheringType::Usb) | Some(TetheringType::Ncm) => {
                // No gadget interface left means the cable is gone.
                let gadget_left = self.links.values().any(|link| {
                    matches!(
                        self.config.type_for_interface(&link.name),
                        Some(TetheringType::Usb) | Some(TetheringType::Ncm)
                    )
                });
                if !gadget_left {
                    self.send(IbusMsg::UsbState(UsbState::Disconnected));
                }
            }
            Some(tethering_type) => {
                self.send(IbusMsg::DownstreamIface {
                    tethering_type,
                    event: IfaceEvent::Unavailable {
                        ifname: ifname.to_owned(),
                    },
                });
            }
            None => (),
        }
    }

    fn process_ethernet_cmd(&mut self, cmd: EthernetCmd) {
        match cmd {
            EthernetCmd::Request { tethering_type } => {
                self.requested.insert(tethering_type);
                // Interfaces already up satisfy the request immediately.
                let available = self
                    .links
                    .values()
                    .filter(|link| link.running)
                    .filter(|link| {
                        self.config
                            .interface_matches(&link.name, tethering_type)
                    })
                    .map(|link| link.name.clone())
                    .collect::<Vec<_>>();
                for ifname in available {
                    self.send(IbusMsg::DownstreamIface {
                        tethering_type,
                        event: IfaceEvent::Available { ifname },
                    });
                }
            }
            EthernetCmd::Release { tethering_type } => {
                self.requested.remove(&tethering_type);
                let released = self
                    .links
                    .values()
                    .filter(|link| {
                        self.config
                            .interface_matches(&link.name, tethering_type)
                    })
                    .map(|link| link.name.clone())
                    .collect::<Vec<_>>();
                for ifname in released {
                    self.send(IbusMsg::DownstreamIface {
                        tethering_type,
                        event: IfaceEvent::Unavailable { ifname },
                    });
                }
            }
        }
    }

    fn process_upstream_cmd(&mut self, cmd: UpstreamCmd) {
        match cmd {
            UpstreamCmd::StartObservation => {
                self.observing = true;
                // Advertise the current upstream right away.
                let upstream = self.upstream.clone();
                self.send(IbusMsg::Upstream(UpstreamEvent::Changed(upstream)));
            }
            UpstreamCmd::StopObservation => {
                self.observing = false;
            }
            UpstreamCmd::SetCellularPreference(wanted) => {
                // Cellular policy belongs to the platform's connectivity
                // service.
                debug!(%wanted, "cellular upstream preference");
            }
            UpstreamCmd::SetPreferTestNetworks(prefer) => {
                debug!(%prefer, "test network preference");
            }
        }
    }

    fn process_usb_cmd(&mut self, cmd: UsbCmd) {
        // Gadget function switching belongs to the platform's USB service;
        // interface appearance is what drives serving here.
        let UsbCmd::SetFunction(function) = cmd;
        debug!(?function, "usb gadget function requested");
    }

    fn process_wifi_cmd(&mut self, cmd: WifiCmd) {
        match cmd {
            WifiCmd::StartSoftAp { .. } => {
                debug!("soft-ap start requested; no Wi-Fi service registered");
            }
            WifiCmd::StopSoftAp => {
                debug!("soft-ap stop requested");
            }
        }
    }

    fn process_bluetooth_cmd(&mut self, cmd: BluetoothCmd) {
        debug!(?cmd, "bluetooth PAN command; no service registered");
    }

    fn send(&self, msg: IbusMsg) {
        let _ = self.ibus_tx.send(msg);
    }
}

// ===== helper functions =====

fn is_default_route(msg: &RouteMessage) -> bool {
    msg.header.destination_prefix_length == 0
        && table_from_message(msg) == libc::RT_TABLE_MAIN as u32
}

fn table_from_message(msg: &RouteMessage) -> u32 {
    msg.attributes
        .iter()
        .find_map(|attr| match attr {
            RouteAttribute::Table(table) => Some(*table),
            _ => None,
        })
        .unwrap_or(msg.header.table as u32)
}

fn oif_from_message(msg: &RouteMessage) -> Option<u32> {
    msg.attributes.iter().find_map(|attr| match attr {
        RouteAttribute::Oif(oif) => Some(*oif),
        _ => None,
    })
}

// ===== global functions =====

pub(crate) fn init() -> (Handle, NetlinkMonitor) {
    // Create netlink socket used for requests.
    let (conn, handle, _) =
        new_connection().expect("Failed to create netlink socket");
    tokio::spawn(conn);

    // Start netlink monitor subscribed to link and IPv4 route changes.
    let (mut conn, _, monitor) =
        new_connection().expect("Failed to create netlink socket");
    let groups = (libc::RTMGRP_LINK | libc::RTMGRP_IPV4_ROUTE) as u32;
    conn.socket_mut()
        .socket_mut()
        .bind(&SocketAddr::new(0, groups))
        .expect("Failed to bind netlink socket");
    tokio::spawn(conn);

    (handle, monitor)
}

pub(crate) fn start(
    config: TetheringConfig,
    ibus_tx: IbusSender,
    handle: Handle,
    monitor_rx: NetlinkMonitor,
    links_rx: LinkChannelsRx,
) {
    tokio::spawn(
        async move {
            let mut monitor = Monitor {
                config,
                ibus_tx,
                links: HashMap::new(),
                requested: BTreeSet::new(),
                upstream: None,
                observing: false,
            };

            // Fetch interface information from the kernel.
            let mut links = handle.link().get().execute();
            while let Ok(Some(msg)) = links.try_next().await {
                monitor.process_newlink_msg(msg, false);
            }

            // Fetch the current IPv4 routes.
            let route = RouteMessageBuilder::<std::net::Ipv4Addr>::new().build();
            let mut routes = handle.route().get(route).execute();
            while let Ok(Some(msg)) = routes.try_next().await {
                monitor.process_newroute_msg(msg, false);
            }

            // Run monitor main loop.
            monitor.run(monitor_rx, links_rx).await;
        }
        .instrument(debug_span!("netlink")),
    );
}
