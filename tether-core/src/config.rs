//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use regex::Regex;
use serde::Deserialize;
use tether_utils::tether::{
    SupportedTypes, TetheringConfigSnapshot, TetheringType,
};

use crate::consts::{
    DEFAULT_IPV4_DNS, DFLT_BLUETOOTH_REGEXS, DFLT_ETHERNET_REGEXS,
    DFLT_NCM_REGEXS, DFLT_USB_REGEXS, DFLT_WIFI_P2P_REGEXS, DFLT_WIFI_REGEXS,
    DFLT_WIGIG_REGEXS, LEGACY_DHCP_RANGES,
};
use crate::error::Error;

// Serializable tethering options, as loaded from the daemon's configuration
// file. Interface matchers are kept as raw patterns here and compiled into
// a [`TetheringConfig`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TetheringOptions {
    pub wifi_regexs: Vec<String>,
    pub wifi_p2p_regexs: Vec<String>,
    pub usb_regexs: Vec<String>,
    pub ncm_regexs: Vec<String>,
    pub bluetooth_regexs: Vec<String>,
    pub ethernet_regexs: Vec<String>,
    pub wigig_regexs: Vec<String>,
    pub virtual_enabled: bool,
    pub legacy_dhcp_server: bool,
    pub legacy_dhcp_ranges: Vec<String>,
    pub default_ipv4_dns: Vec<IpAddr>,
    // When set, serving uniqueness is keyed by (type, uid) instead of type
    // alone, allowing distinct callers to share a type (soft-AP-config
    // request mode).
    pub request_per_uid: bool,
}

// Compiled runtime configuration of the control plane.
#[derive(Clone, Debug)]
pub struct TetheringConfig {
    matchers: Vec<TypeMatcher>,
    patterns: TetheringOptions,
    pub virtual_enabled: bool,
    pub legacy_dhcp_server: bool,
    pub legacy_dhcp_ranges: Vec<String>,
    pub default_ipv4_dns: Vec<IpAddr>,
    pub request_per_uid: bool,
}

#[derive(Clone, Debug)]
struct TypeMatcher {
    tethering_type: TetheringType,
    regexs: Vec<Regex>,
}

// ===== impl TetheringOptions =====

impl Default for TetheringOptions {
    fn default() -> TetheringOptions {
        fn patterns(list: &[&str]) -> Vec<String> {
            list.iter().map(|re| (*re).to_owned()).collect()
        }

        TetheringOptions {
            wifi_regexs: patterns(&DFLT_WIFI_REGEXS),
            wifi_p2p_regexs: patterns(&DFLT_WIFI_P2P_REGEXS),
            usb_regexs: patterns(&DFLT_USB_REGEXS),
            ncm_regexs: patterns(&DFLT_NCM_REGEXS),
            bluetooth_regexs: patterns(&DFLT_BLUETOOTH_REGEXS),
            ethernet_regexs: patterns(&DFLT_ETHERNET_REGEXS),
            wigig_regexs: patterns(&DFLT_WIGIG_REGEXS),
            virtual_enabled: true,
            legacy_dhcp_server: false,
            legacy_dhcp_ranges: patterns(&LEGACY_DHCP_RANGES),
            default_ipv4_dns: DEFAULT_IPV4_DNS
                .iter()
                .map(|addr| addr.parse().unwrap())
                .collect(),
            request_per_uid: false,
        }
    }
}

// ===== impl TetheringConfig =====

impl TetheringConfig {
    // Compiles the interface matchers out of the raw options.
    pub fn new(options: TetheringOptions) -> Result<TetheringConfig, Error> {
        // USB and NCM come first so gadget interfaces never fall through to
        // a broader matcher.
        let sets = [
            (TetheringType::Usb, &options.usb_regexs),
            (TetheringType::Ncm, &options.ncm_regexs),
            (TetheringType::WifiP2p, &options.wifi_p2p_regexs),
            (TetheringType::Wifi, &options.wifi_regexs),
            (TetheringType::Bluetooth, &options.bluetooth_regexs),
            (TetheringType::Ethernet, &options.ethernet_regexs),
            (TetheringType::Wigig, &options.wigig_regexs),
        ];

        let mut matchers = Vec::with_capacity(sets.len());
        for (tethering_type, patterns) in sets {
            let mut regexs = Vec::with_capacity(patterns.len());
            for pattern in patterns {
                // Anchor the pattern so "usb\d" doesn't match "xusb0n".
                let regex = Regex::new(&format!("^(?:{pattern})$"))
                    .map_err(|error| Error::InvalidIfaceRegex {
                        pattern: pattern.clone(),
                        error,
                    })?;
                regexs.push(regex);
            }
            matchers.push(TypeMatcher {
                tethering_type,
                regexs,
            });
        }

        Ok(TetheringConfig {
            matchers,
            virtual_enabled: options.virtual_enabled,
            legacy_dhcp_server: options.legacy_dhcp_server,
            legacy_dhcp_ranges: options.legacy_dhcp_ranges.clone(),
            default_ipv4_dns: options.default_ipv4_dns.clone(),
            request_per_uid: options.request_per_uid,
            patterns: options,
        })
    }

    // Infers the downstream type of an interface from the configured
    // matchers. Returns None when the interface is not tetherable.
    pub fn type_for_interface(&self, ifname: &str) -> Option<TetheringType> {
        self.matchers
            .iter()
            .find(|matcher| {
                matcher.regexs.iter().any(|regex| regex.is_match(ifname))
            })
            .map(|matcher| matcher.tethering_type)
    }

    // Whether the interface name belongs to the given downstream type.
    pub fn interface_matches(
        &self,
        ifname: &str,
        tethering_type: TetheringType,
    ) -> bool {
        self.matchers
            .iter()
            .filter(|matcher| matcher.tethering_type == tethering_type)
            .any(|matcher| {
                matcher.regexs.iter().any(|regex| regex.is_match(ifname))
            })
    }

    // Bitmap of the tethering types this configuration enables.
    pub fn supported_types(&self) -> SupportedTypes {
        let mut supported = SupportedTypes::empty();
        for matcher in &self.matchers {
            if !matcher.regexs.is_empty() {
                supported.insert(matcher.tethering_type.supported_flag());
            }
        }
        if self.virtual_enabled {
            supported.insert(SupportedTypes::VIRTUAL);
        }
        supported
    }

    // Stable snapshot handed to observers.
    pub fn snapshot(&self) -> TetheringConfigSnapshot {
        TetheringConfigSnapshot {
            tetherable_wifi_regexs: self.patterns.wifi_regexs.clone(),
            tetherable_usb_regexs: self.patterns.usb_regexs.clone(),
            tetherable_bluetooth_regexs: self
                .patterns
                .bluetooth_regexs
                .clone(),
            legacy_dhcp_ranges: self.legacy_dhcp_ranges.clone(),
            default_ipv4_dns: self.default_ipv4_dns.clone(),
        }
    }
}

impl Default for TetheringConfig {
    fn default() -> TetheringConfig {
        TetheringConfig::new(TetheringOptions::default())
            .expect("default interface patterns must compile")
    }
}

// ===== tests =====
