//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr};

use futures::TryStreamExt;
use rtnetlink::Handle;
use tether_utils::ipserver::{
    IpServerEvent, IpServerEventMsg, IpServerEventSender, IpServerFactory,
    IpServerHandle, IpServerId, IpServerMsg, LinkProperties,
};
use tether_utils::tether::{
    IpServingState, TetherError, TetheringRequest, TetheringType,
};
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, debug_span, trace, warn, Instrument};

// Address provisioning for the downstreams: one /24 out of the legacy
// tethering block per server.
const SUBNET_BASE: u8 = 42;
const SUBNET_COUNT: usize = 10;
const PREFIX_LEN: u8 = 24;

// IP server driver working over netlink.
//
// Serving-readiness, address provisioning and the state callbacks are
// handled here; DHCP/RA for the downstream peers is left to the network
// daemon's relay.
pub struct NetlinkIpServerFactory {
    handle: Handle,
}

// ===== impl NetlinkIpServerFactory =====

impl NetlinkIpServerFactory {
    pub fn new(handle: Handle) -> NetlinkIpServerFactory {
        NetlinkIpServerFactory { handle }
    }
}

impl IpServerFactory for NetlinkIpServerFactory {
    fn create(
        &mut self,
        id: IpServerId,
        ifname: &str,
        tethering_type: TetheringType,
        _is_ncm: bool,
        event_tx: IpServerEventSender,
    ) -> IpServerHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let handle = self.handle.clone();
        let ifname_owned = ifname.to_owned();
        let span = debug_span!("ip-server", ifname = %ifname_owned);
        tokio::spawn(
            async move {
                run_server(id, ifname_owned, handle, cmd_rx, event_tx).await;
            }
            .instrument(span),
        );

        IpServerHandle::new(id, ifname.to_owned(), tethering_type, cmd_tx)
    }
}

// ===== helper functions =====

fn notify(
    event_tx: &IpServerEventSender,
    id: IpServerId,
    ifname: &str,
    event: IpServerEvent,
) {
    let _ = event_tx.send(IpServerEventMsg {
        id,
        ifname: ifname.to_owned(),
        event,
    });
}

fn state_changed(state: IpServingState, last_error: TetherError) -> IpServerEvent {
    IpServerEvent::StateChanged { state, last_error }
}

// Gateway address of the /24 assigned to this server.
fn gateway_addr(id: IpServerId) -> Ipv4Addr {
    let subnet = SUBNET_BASE + (id % SUBNET_COUNT) as u8;
    Ipv4Addr::new(192, 168, subnet, 1)
}

async fn ifindex_of(handle: &Handle, ifname: &str) -> Option<u32> {
    let mut links = handle.link().get().match_name(ifname.to_owned()).execute();
    match links.try_next().await {
        Ok(Some(msg)) => Some(msg.header.index),
        Ok(None) => None,
        Err(error) => {
            warn!(%error, "failed to look up interface");
            None
        }
    }
}

async fn addr_install(
    handle: &Handle,
    ifindex: u32,
    addr: Ipv4Addr,
) -> Result<(), rtnetlink::Error> {
    handle
        .address()
        .add(ifindex, IpAddr::V4(addr), PREFIX_LEN)
        .execute()
        .await
}

async fn addr_uninstall(handle: &Handle, ifindex: u32, addr: Ipv4Addr) {
    let mut request =
        handle.address().add(ifindex, IpAddr::V4(addr), PREFIX_LEN);
    let request = handle.address().del(request.message_mut().clone());
    if let Err(error) = request.execute().await {
        warn!(%error, "failed to uninstall downstream address");
    }
}

// Per-downstream server task. Commands arrive over the handle's channel;
// dropping the handle counts as Stop.
async fn run_server(
    id: IpServerId,
    ifname: String,
    handle: Handle,
    mut cmd_rx: UnboundedReceiver<IpServerMsg>,
    event_tx: IpServerEventSender,
) {
    let mut installed: Option<(u32, Ipv4Addr)> = None;

    loop {
        let Some(msg) = cmd_rx.recv().await else {
            break;
        };
        match msg {
            IpServerMsg::Start => {
                notify(
                    &event_tx,
                    id,
                    &ifname,
                    state_changed(
                        IpServingState::Available,
                        TetherError::NoError,
                    ),
                );
            }
            IpServerMsg::Enable(request) => {
                enable(
                    id,
                    &ifname,
                    &handle,
                    &event_tx,
                    &mut installed,
                    request,
                )
                .await;
            }
            IpServerMsg::Unwanted => {
                if let Some((ifindex, addr)) = installed.take() {
                    addr_uninstall(&handle, ifindex, addr).await;
                }
                notify(
                    &event_tx,
                    id,
                    &ifname,
                    state_changed(
                        IpServingState::Available,
                        TetherError::NoError,
                    ),
                );
            }
            IpServerMsg::Stop => {
                break;
            }
            IpServerMsg::TetherConnectionChanged { upstream_ifaces } => {
                trace!(?upstream_ifaces, "upstream interfaces changed");
            }
            IpServerMsg::IpForwardingEnableError
            | IpServerMsg::IpForwardingDisableError
            | IpServerMsg::StartTetheringError
            | IpServerMsg::StopTetheringError
            | IpServerMsg::SetDnsForwardersError => {
                warn!(?msg, "tethering error notification");
            }
            IpServerMsg::NotifyPrefixConflict => {
                warn!("downstream prefix conflicts with the upstream");
            }
        }
    }

    // Final teardown.
    if let Some((ifindex, addr)) = installed.take() {
        addr_uninstall(&handle, ifindex, addr).await;
    }
    notify(
        &event_tx,
        id,
        &ifname,
        state_changed(IpServingState::Unavailable, TetherError::NoError),
    );
    debug!("ip server exited");
}

async fn enable(
    id: IpServerId,
    ifname: &str,
    handle: &Handle,
    event_tx: &IpServerEventSender,
    installed: &mut Option<(u32, Ipv4Addr)>,
    request: TetheringRequest,
) {
    let Some(ifindex) = ifindex_of(handle, ifname).await else {
        notify(
            event_tx,
            id,
            ifname,
            state_changed(
                IpServingState::Available,
                TetherError::IfaceCfgError,
            ),
        );
        return;
    };

    let addr = gateway_addr(id);
    if installed.is_none() {
        if let Err(error) = addr_install(handle, ifindex, addr).await {
            warn!(%error, "failed to install downstream address");
            notify(
                event_tx,
                id,
                ifname,
                state_changed(
                    IpServingState::Available,
                    TetherError::IfaceCfgError,
                ),
            );
            return;
        }
        *installed = Some((ifindex, addr));
    }

    notify(
        event_tx,
        id,
        ifname,
        IpServerEvent::LinkPropertiesChanged(LinkProperties {
            addresses: vec![IpAddr::V4(addr)],
        }),
    );
    notify(
        event_tx,
        id,
        ifname,
        state_changed(request.requested_state(), TetherError::NoError),
    );
}
