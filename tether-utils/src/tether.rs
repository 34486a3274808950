//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::mac_addr::MacAddr;

// Downstream link-layer types that can be tethered.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum TetheringType {
    Wifi,
    WifiP2p,
    Usb,
    Ncm,
    Bluetooth,
    Ethernet,
    Virtual,
    Wigig,
}

bitflags! {
    // Bitmap of tethering types currently supported by the device.
    //
    // This is the only piece of control-plane state readable from outside
    // the event-loop thread (stored in an AtomicU32 with release/acquire
    // ordering).
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct SupportedTypes: u32 {
        const WIFI = 0x01;
        const WIFI_P2P = 0x02;
        const USB = 0x04;
        const NCM = 0x08;
        const BLUETOOTH = 0x10;
        const ETHERNET = 0x20;
        const VIRTUAL = 0x40;
        const WIGIG = 0x80;
    }
}

// Whether tethered peers get global connectivity or local-only IP service.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum ConnectivityScope {
    #[default]
    Global,
    Local,
}

// Origin of a tethering request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum RequestType {
    Explicit,
    Implicit,
    Legacy,
    Placeholder,
}

// Wi-Fi band requested for a soft AP.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum ApBand {
    #[default]
    Any,
    Ghz2,
    Ghz5,
    Ghz6,
}

// Soft-AP configuration carried by Wi-Fi tethering requests.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct SoftApConfig {
    pub ssid: String,
    pub passphrase: Option<String>,
    pub band: ApBand,
    pub hidden: bool,
}

// Typed description of a tethering intent.
//
// Two requests are interchangeable when every field except the caller
// identity (`uid`/`package_name`) matches; see `equals_ignoring_identity`.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct TetheringRequest {
    pub tethering_type: TetheringType,
    pub connectivity_scope: ConnectivityScope,
    pub soft_ap_config: Option<SoftApConfig>,
    pub interface_name: Option<String>,
    pub exempt_from_entitlement_check: bool,
    pub show_entitlement_ui: bool,
    pub request_type: RequestType,
    pub uid: Option<u32>,
    pub package_name: Option<String>,
}

// Per-interface IP-serving states.
//
// The numeric encoding is stable for wire compatibility with downstream
// state broadcasts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum IpServingState {
    Unavailable = 0,
    Available = 1,
    Tethered = 2,
    LocalOnly = 3,
}

// Tethering result codes surfaced through the public API.
//
// The integer values are stable. `BluetoothServicePending` and
// `SoftApCallbackPending` are internal sentinels meaning "the result will be
// delivered later by the link adapter"; they must never reach an external
// caller.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum TetherError {
    NoError = 0,
    UnknownIface = 1,
    ServiceUnavail = 2,
    Unsupported = 3,
    UnavailIface = 4,
    InternalError = 5,
    TetherIfaceError = 6,
    UntetherIfaceError = 7,
    EnableForwardingError = 8,
    DisableForwardingError = 9,
    IfaceCfgError = 10,
    ProvisioningFailed = 11,
    DhcpServerError = 12,
    EntitlementUnknown = 13,
    NoChangeTetheringPermission = 14,
    NoAccessTetheringPermission = 15,
    UnknownType = 16,
    UnknownRequest = 17,
    DuplicateRequest = 18,
    BluetoothServicePending = 19,
    SoftApCallbackPending = 20,
}

// Opaque identifier of an upstream network.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct NetworkId(pub u32);

// Description of a candidate upstream network as advertised by the upstream
// selector.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct UpstreamNetwork {
    pub network: NetworkId,
    pub ifname: String,
    // Stacked interfaces (e.g. clat) that also carry tethered traffic.
    pub stacked: Vec<String>,
    pub dns_servers: Vec<IpAddr>,
}

// A client currently connected to one of the downstreams.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct TetheredClient {
    pub mac_addr: MacAddr,
    pub addresses: Vec<IpAddr>,
    pub tethering_type: TetheringType,
}

// Hardware offload status reported to observers.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum OffloadStatus {
    #[default]
    Stopped = 0,
    Started = 1,
    Failed = 2,
}

// A downstream interface as reported to observers. The soft-AP configuration
// is filtered per observer cookie before delivery.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct TetheringInterface {
    pub tethering_type: TetheringType,
    pub ifname: String,
    pub soft_ap_config: Option<SoftApConfig>,
}

// Snapshot of every downstream grouped by serving state.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct TetherStates {
    pub available: Vec<TetheringInterface>,
    pub tethered: Vec<TetheringInterface>,
    pub local_only: Vec<TetheringInterface>,
    pub errored: Vec<TetheringInterface>,
    // Last error of each entry in `errored`, in the same order.
    pub last_errors: Vec<TetherError>,
}

// Stable configuration snapshot handed to observers.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct TetheringConfigSnapshot {
    pub tetherable_wifi_regexs: Vec<String>,
    pub tetherable_usb_regexs: Vec<String>,
    pub tetherable_bluetooth_regexs: Vec<String>,
    pub legacy_dhcp_ranges: Vec<String>,
    pub default_ipv4_dns: Vec<IpAddr>,
}

// Full state snapshot delivered once when an observer registers.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct CallbackStarted {
    pub supported_types: SupportedTypes,
    pub upstream_network: Option<NetworkId>,
    pub config: TetheringConfigSnapshot,
    pub states: TetherStates,
    pub tethered_clients: Vec<TetheredClient>,
    pub offload_status: OffloadStatus,
}

// ===== impl TetheringType =====

impl TetheringType {
    pub const ALL: [TetheringType; 8] = [
        TetheringType::Wifi,
        TetheringType::WifiP2p,
        TetheringType::Usb,
        TetheringType::Ncm,
        TetheringType::Bluetooth,
        TetheringType::Ethernet,
        TetheringType::Virtual,
        TetheringType::Wigig,
    ];

    // Returns the bit representing this type in the supported-types bitmap.
    pub fn supported_flag(&self) -> SupportedTypes {
        match self {
            TetheringType::Wifi => SupportedTypes::WIFI,
            TetheringType::WifiP2p => SupportedTypes::WIFI_P2P,
            TetheringType::Usb => SupportedTypes::USB,
            TetheringType::Ncm => SupportedTypes::NCM,
            TetheringType::Bluetooth => SupportedTypes::BLUETOOTH,
            TetheringType::Ethernet => SupportedTypes::ETHERNET,
            TetheringType::Virtual => SupportedTypes::VIRTUAL,
            TetheringType::Wigig => SupportedTypes::WIGIG,
        }
    }
}

impl std::fmt::Display for TetheringType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TetheringType::Wifi => write!(f, "wifi"),
            TetheringType::WifiP2p => write!(f, "wifi-p2p"),
            TetheringType::Usb => write!(f, "usb"),
            TetheringType::Ncm => write!(f, "ncm"),
            TetheringType::Bluetooth => write!(f, "bluetooth"),
            TetheringType::Ethernet => write!(f, "ethernet"),
            TetheringType::Virtual => write!(f, "virtual"),
            TetheringType::Wigig => write!(f, "wigig"),
        }
    }
}

// ===== impl TetheringRequest =====

impl TetheringRequest {
    // Synthesizes a placeholder request carrying only a type and the default
    // connectivity scope. Used when a real request is missing at the moment
    // IP serving must start.
    pub fn placeholder(tethering_type: TetheringType) -> TetheringRequest {
        TetheringRequest {
            tethering_type,
            connectivity_scope: ConnectivityScope::Global,
            soft_ap_config: None,
            interface_name: None,
            exempt_from_entitlement_check: false,
            show_entitlement_ui: false,
            request_type: RequestType::Placeholder,
            uid: None,
            package_name: None,
        }
    }

    // Compares two requests ignoring the caller identity.
    //
    // A placeholder request is never considered equal to an explicit one,
    // which falls out naturally from the `request_type` comparison.
    pub fn equals_ignoring_identity(&self, other: &TetheringRequest) -> bool {
        self.tethering_type == other.tethering_type
            && self.connectivity_scope == other.connectivity_scope
            && self.soft_ap_config == other.soft_ap_config
            && self.interface_name == other.interface_name
            && self.exempt_from_entitlement_check
                == other.exempt_from_entitlement_check
            && self.show_entitlement_ui == other.show_entitlement_ui
            && self.request_type == other.request_type
    }

    // The serving state requested by this request's connectivity scope.
    pub fn requested_state(&self) -> IpServingState {
        match self.connectivity_scope {
            ConnectivityScope::Global => IpServingState::Tethered,
            ConnectivityScope::Local => IpServingState::LocalOnly,
        }
    }
}

// ===== impl IpServingState =====

impl IpServingState {
    // Whether this state offers IP service to peers.
    pub fn is_serving(&self) -> bool {
        matches!(self, IpServingState::Tethered | IpServingState::LocalOnly)
    }

    pub fn code(&self) -> u32 {
        *self as u32
    }
}

// ===== impl TetherError =====

impl TetherError {
    pub fn code(&self) -> i32 {
        *self as i32
    }

    // Internal sentinels indicate deferred delivery and must be translated
    // before crossing the API boundary.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            TetherError::BluetoothServicePending
                | TetherError::SoftApCallbackPending
        )
    }
}

impl std::fmt::Display for TetherError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TetherError::NoError => write!(f, "no error"),
            TetherError::UnknownIface => write!(f, "unknown interface"),
            TetherError::ServiceUnavail => write!(f, "service unavailable"),
            TetherError::Unsupported => write!(f, "unsupported"),
            TetherError::UnavailIface => write!(f, "interface unavailable"),
            TetherError::InternalError => write!(f, "internal error"),
            TetherError::TetherIfaceError => write!(f, "tether iface error"),
            TetherError::UntetherIfaceError => {
                write!(f, "untether iface error")
            }
            TetherError::EnableForwardingError => {
                write!(f, "enable forwarding error")
            }
            TetherError::DisableForwardingError => {
                write!(f, "disable forwarding error")
            }
            TetherError::IfaceCfgError => write!(f, "iface config error"),
            TetherError::ProvisioningFailed => write!(f, "provisioning failed"),
            TetherError::DhcpServerError => write!(f, "dhcp server error"),
            TetherError::EntitlementUnknown => write!(f, "entitlement unknown"),
            TetherError::NoChangeTetheringPermission => {
                write!(f, "no change tethering permission")
            }
            TetherError::NoAccessTetheringPermission => {
                write!(f, "no access tethering permission")
            }
            TetherError::UnknownType => write!(f, "unknown tethering type"),
            TetherError::UnknownRequest => write!(f, "unknown request"),
            TetherError::DuplicateRequest => write!(f, "duplicate request"),
            TetherError::BluetoothServicePending => {
                write!(f, "bluetooth service pending")
            }
            TetherError::SoftApCallbackPending => {
                write!(f, "soft-ap callback pending")
            }
        }
    }
}

// ===== impl UpstreamNetwork =====

impl UpstreamNetwork {
    // Full set of interfaces carrying tethered traffic for this upstream:
    // the upstream interface itself plus any stacked interfaces.
    pub fn interface_set(&self) -> Vec<String> {
        let mut ifaces = Vec::with_capacity(1 + self.stacked.len());
        ifaces.push(self.ifname.clone());
        ifaces.extend(self.stacked.iter().cloned());
        ifaces
    }
}
