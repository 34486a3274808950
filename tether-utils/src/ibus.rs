//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::tether::{
    NetworkId, SoftApConfig, TetheringType, UpstreamNetwork,
};

// Useful type definition(s).
pub type IbusReceiver = UnboundedReceiver<IbusMsg>;
pub type IbusSender = UnboundedSender<IbusMsg>;

/// Bus message carrying an external notification into the control plane.
///
/// The link-layer monitors and the upstream monitor own the Tx end; the
/// master event loop owns the single Rx end, so every notification is
/// serialized with the rest of the control-plane work.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum IbusMsg {
    /// Soft-AP state change reported by the Wi-Fi layer.
    WifiApState(WifiApState),
    /// Wi-Fi Direct group change. `ifname` is set while the device is the
    /// group owner of an active group.
    WifiP2pGroup {
        group_owner: bool,
        ifname: Option<String>,
    },
    /// USB gadget state change.
    UsbState(UsbState),
    /// Bluetooth PAN profile event.
    BluetoothPan(PanEvent),
    /// Downstream interface availability (Ethernet and virtual types).
    DownstreamIface {
        tethering_type: TetheringType,
        event: IfaceEvent,
    },
    /// Upstream selector notification.
    Upstream(UpstreamEvent),
    /// User policy restriction change.
    UserRestriction { disallow_tethering: bool },
    /// Data-saver state change.
    DataSaver { enabled: bool },
}

/// Downstream interface availability events.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum IfaceEvent {
    Available { ifname: String },
    Unavailable { ifname: String },
}

/// Soft-AP states reported by the Wi-Fi layer.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum WifiApState {
    Enabled { ifname: String },
    Failed,
    Disabled { ifname: Option<String> },
}

/// USB gadget states relevant to tethering.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum UsbState {
    /// The gadget is configured with a tetherable function active.
    Configured { function: UsbFunction },
    Disconnected,
}

/// Tetherable USB gadget functions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum UsbFunction {
    Rndis,
    Ncm,
}

/// Bluetooth PAN profile events.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum PanEvent {
    /// The deferred PAN profile bind completed.
    ServiceConnected,
    /// The PAN profile connection was lost.
    ServiceDisconnected,
    /// The PAN interface came up after tethering was enabled on the proxy.
    InterfaceAvailable { ifname: String },
}

/// Upstream selector notifications.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum UpstreamEvent {
    /// The preferred upstream changed (None = no upstream available).
    Changed(Option<UpstreamNetwork>),
    /// Link properties of the current upstream changed.
    LinkPropertiesChanged(UpstreamNetwork),
    /// The given upstream network was lost.
    Lost(NetworkId),
    /// The default network switched.
    DefaultSwitched(Option<UpstreamNetwork>),
    /// The caller's permission to use the upstream changed.
    PermissionChanged,
}

/// Commands to the Wi-Fi layer.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum WifiCmd {
    StartSoftAp { config: Option<SoftApConfig> },
    StopSoftAp,
}

/// Commands to the USB gadget glue.
#[derive(Clone, Copy, Debug)]
#[derive(Deserialize, Serialize)]
pub enum UsbCmd {
    /// Activate a tetherable gadget function, or deactivate tethering
    /// functions altogether (None).
    SetFunction(Option<UsbFunction>),
}

/// Commands to the Bluetooth PAN profile glue.
#[derive(Clone, Copy, Debug)]
#[derive(Deserialize, Serialize)]
pub enum BluetoothCmd {
    /// Bind to the PAN profile (deferred until the first tethering start).
    BindPan,
    /// Enable or disable tethering on the bound PAN proxy.
    SetPanTethering(bool),
}

/// Commands to the Ethernet/virtual interface glue.
#[derive(Clone, Copy, Debug)]
#[derive(Deserialize, Serialize)]
pub enum EthernetCmd {
    /// Open an interface handle for the given downstream type.
    Request { tethering_type: TetheringType },
    /// Release the interface handle.
    Release { tethering_type: TetheringType },
}

/// Commands to the upstream selector.
#[derive(Clone, Copy, Debug)]
#[derive(Deserialize, Serialize)]
pub enum UpstreamCmd {
    StartObservation,
    StopObservation,
    /// Hint that a cellular upstream is (or is no longer) wanted.
    SetCellularPreference(bool),
    SetPreferTestNetworks(bool),
}

/// Transmit channels for the commands the control plane sends to each
/// link-layer subsystem.
#[derive(Clone, Debug)]
pub struct LinkChannelsTx {
    wifi: UnboundedSender<WifiCmd>,
    usb: UnboundedSender<UsbCmd>,
    bluetooth: UnboundedSender<BluetoothCmd>,
    ethernet: UnboundedSender<EthernetCmd>,
    upstream: UnboundedSender<UpstreamCmd>,
}

/// Receive channels for the link-layer subsystems.
#[derive(Debug)]
pub struct LinkChannelsRx {
    pub wifi: UnboundedReceiver<WifiCmd>,
    pub usb: UnboundedReceiver<UsbCmd>,
    pub bluetooth: UnboundedReceiver<BluetoothCmd>,
    pub ethernet: UnboundedReceiver<EthernetCmd>,
    pub upstream: UnboundedReceiver<UpstreamCmd>,
}

// ===== impl LinkChannelsTx =====

impl LinkChannelsTx {
    /// Sends a [`WifiCmd::StartSoftAp`] command to the Wi-Fi layer.
    pub fn wifi_start_soft_ap(&self, config: Option<SoftApConfig>) {
        let _ = self.wifi.send(WifiCmd::StartSoftAp { config });
    }

    /// Sends a [`WifiCmd::StopSoftAp`] command to the Wi-Fi layer.
    pub fn wifi_stop_soft_ap(&self) {
        let _ = self.wifi.send(WifiCmd::StopSoftAp);
    }

    /// Sends a [`UsbCmd::SetFunction`] command to the USB gadget glue.
    pub fn usb_set_function(&self, function: Option<UsbFunction>) {
        let _ = self.usb.send(UsbCmd::SetFunction(function));
    }

    /// Sends a [`BluetoothCmd::BindPan`] command to the Bluetooth glue.
    pub fn bluetooth_bind_pan(&self) {
        let _ = self.bluetooth.send(BluetoothCmd::BindPan);
    }

    /// Sends a [`BluetoothCmd::SetPanTethering`] command to the Bluetooth
    /// glue.
    pub fn bluetooth_set_pan_tethering(&self, enable: bool) {
        let _ = self.bluetooth.send(BluetoothCmd::SetPanTethering(enable));
    }

    /// Sends an [`EthernetCmd::Request`] command to the interface glue.
    pub fn ethernet_request(&self, tethering_type: TetheringType) {
        let _ = self.ethernet.send(EthernetCmd::Request { tethering_type });
    }

    /// Sends an [`EthernetCmd::Release`] command to the interface glue.
    pub fn ethernet_release(&self, tethering_type: TetheringType) {
        let _ = self.ethernet.send(EthernetCmd::Release { tethering_type });
    }

    /// Sends an [`UpstreamCmd::StartObservation`] command to the upstream
    /// selector.
    pub fn upstream_start_observation(&self) {
        let _ = self.upstream.send(UpstreamCmd::StartObservation);
    }

    /// Sends an [`UpstreamCmd::StopObservation`] command to the upstream
    /// selector.
    pub fn upstream_stop_observation(&self) {
        let _ = self.upstream.send(UpstreamCmd::StopObservation);
    }

    /// Sends an [`UpstreamCmd::SetCellularPreference`] command to the
    /// upstream selector.
    pub fn upstream_set_cellular_preference(&self, wanted: bool) {
        let _ = self
            .upstream
            .send(UpstreamCmd::SetCellularPreference(wanted));
    }

    /// Sends an [`UpstreamCmd::SetPreferTestNetworks`] command to the
    /// upstream selector.
    pub fn upstream_set_prefer_test_networks(&self, prefer: bool) {
        let _ = self.upstream.send(UpstreamCmd::SetPreferTestNetworks(prefer));
    }
}

// ===== global functions =====

/// Creates the command channels linking the control plane to the link-layer
/// subsystems.
///
/// Returns a tuple containing:
/// - A [`LinkChannelsTx`] instance, owned by the master event loop.
/// - A [`LinkChannelsRx`] instance, whose receivers should be handed to the
///   corresponding link-layer monitors.
pub fn link_channels() -> (LinkChannelsTx, LinkChannelsRx) {
    let (wifi_tx, wifi_rx) = mpsc::unbounded_channel();
    let (usb_tx, usb_rx) = mpsc::unbounded_channel();
    let (bluetooth_tx, bluetooth_rx) = mpsc::unbounded_channel();
    let (ethernet_tx, ethernet_rx) = mpsc::unbounded_channel();
    let (upstream_tx, upstream_rx) = mpsc::unbounded_channel();

    let tx = LinkChannelsTx {
        wifi: wifi_tx,
        usb: usb_tx,
        bluetooth: bluetooth_tx,
        ethernet: ethernet_tx,
        upstream: upstream_tx,
    };
    let rx = LinkChannelsRx {
        wifi: wifi_rx,
        usb: usb_rx,
        bluetooth: bluetooth_rx,
        ethernet: ethernet_rx,
        upstream: upstream_rx,
    };

    (tx, rx)
}
