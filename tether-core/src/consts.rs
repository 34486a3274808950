//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

// Delay before retrying upstream selection when no upstream is available.
pub const SETTLE_TIME: Duration = Duration::from_secs(10);

// Tag passed to the forwarding toggle so concurrent requesters can be told
// apart by the network daemon.
pub const FORWARDING_TAG: &str = "tethering";

// DHCP ranges handed to the network daemon when the legacy DHCP server is
// enabled. Pairs of (first, last) addresses, one /24 per downstream.
pub const LEGACY_DHCP_RANGES: [&str; 20] = [
    "192.168.42.2", "192.168.42.254",
    "192.168.43.2", "192.168.43.254",
    "192.168.44.2", "192.168.44.254",
    "192.168.45.2", "192.168.45.254",
    "192.168.46.2", "192.168.46.254",
    "192.168.47.2", "192.168.47.254",
    "192.168.48.2", "192.168.48.254",
    "192.168.49.2", "192.168.49.254",
    "192.168.50.2", "192.168.50.254",
    "192.168.51.2", "192.168.51.254",
];

// DNS forwarders used when the upstream advertises none.
pub const DEFAULT_IPV4_DNS: [&str; 2] = ["8.8.8.8", "8.8.4.4"];

// Default per-type interface name patterns.
pub const DFLT_WIFI_REGEXS: [&str; 2] = ["wlan\\d", "ap_br_wlan\\d"];
pub const DFLT_WIFI_P2P_REGEXS: [&str; 1] = ["p2p-p2p\\d-.*"];
pub const DFLT_USB_REGEXS: [&str; 2] = ["usb\\d", "rndis\\d"];
pub const DFLT_NCM_REGEXS: [&str; 1] = ["ncm\\d"];
pub const DFLT_BLUETOOTH_REGEXS: [&str; 1] = ["bt-pan"];
pub const DFLT_ETHERNET_REGEXS: [&str; 1] = ["eth\\d"];
pub const DFLT_WIGIG_REGEXS: [&str; 1] = ["wigig\\d"];
