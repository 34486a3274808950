//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::warn;

use crate::tether::{
    IpServingState, TetherError, TetheredClient, TetheringRequest,
    TetheringType,
};

// Opaque identifier of an IP server instance.
//
// Identifiers are never reused within a master's lifetime, which is what
// makes stale state callbacks from a replaced server detectable.
pub type IpServerId = usize;

/// Commands sent by the control plane to an IP server.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum IpServerMsg {
    /// Start serving-readiness monitoring on the interface.
    Start,
    /// Tear the server down; no further callbacks are expected.
    Stop,
    /// Begin IP serving for the given request.
    Enable(TetheringRequest),
    /// Gracefully leave the serving state (back to available/unavailable).
    Unwanted,
    /// The set of upstream interfaces changed (None = upstream lost).
    TetherConnectionChanged { upstream_ifaces: Option<Vec<String>> },
    IpForwardingEnableError,
    IpForwardingDisableError,
    StartTetheringError,
    StopTetheringError,
    SetDnsForwardersError,
    NotifyPrefixConflict,
}

/// Link properties reported by an IP server for its downstream.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LinkProperties {
    pub addresses: Vec<IpAddr>,
}

/// Callbacks emitted by an IP server towards the control plane.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum IpServerEvent {
    StateChanged {
        state: IpServingState,
        last_error: TetherError,
    },
    LinkPropertiesChanged(LinkProperties),
    /// The set of DHCP leases changed; carries the full client list.
    DhcpLeasesChanged { clients: Vec<TetheredClient> },
    /// The server asks the core to enable or disable tethering of a type
    /// (e.g. NCM requested while USB serving is active).
    RequestEnableTethering {
        tethering_type: TetheringType,
        enable: bool,
    },
}

/// An IP server callback together with the emitting server's identity.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct IpServerEventMsg {
    pub id: IpServerId,
    pub ifname: String,
    pub event: IpServerEvent,
}

pub type IpServerEventSender = UnboundedSender<IpServerEventMsg>;
pub type IpServerEventReceiver = UnboundedReceiver<IpServerEventMsg>;

/// Handle to a single IP server instance.
///
/// The control plane owns the handle for the server's full lifetime;
/// dropping it severs the command channel, which the server implementation
/// treats as `Stop`.
#[derive(Debug)]
pub struct IpServerHandle {
    pub id: IpServerId,
    pub ifname: String,
    pub tethering_type: TetheringType,
    cmd_tx: UnboundedSender<IpServerMsg>,
}

/// Constructor for IP server instances.
///
/// The actual IP server (DHCP, RA, neighbor proxying) is an external
/// collaborator; the control plane only drives it through this factory and
/// the resulting handles.
pub trait IpServerFactory: Send {
    fn create(
        &mut self,
        id: IpServerId,
        ifname: &str,
        tethering_type: TetheringType,
        is_ncm: bool,
        event_tx: IpServerEventSender,
    ) -> IpServerHandle;
}

// ===== impl IpServerHandle =====

impl IpServerHandle {
    pub fn new(
        id: IpServerId,
        ifname: String,
        tethering_type: TetheringType,
        cmd_tx: UnboundedSender<IpServerMsg>,
    ) -> IpServerHandle {
        IpServerHandle {
            id,
            ifname,
            tethering_type,
            cmd_tx,
        }
    }

    /// Sends a command to the IP server.
    pub fn send(&self, msg: IpServerMsg) {
        if self.cmd_tx.send(msg).is_err() {
            warn!(ifname = %self.ifname, "ip server command channel closed");
        }
    }

    pub fn start(&self) {
        self.send(IpServerMsg::Start);
    }

    pub fn stop(&self) {
        self.send(IpServerMsg::Stop);
    }

    pub fn enable(&self, request: TetheringRequest) {
        self.send(IpServerMsg::Enable(request));
    }

    pub fn unwanted(&self) {
        self.send(IpServerMsg::Unwanted);
    }
}
