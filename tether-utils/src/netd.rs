//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

// Client interface to the kernel/network daemon.
//
// Calls are synchronous from the control plane's perspective; they run on
// the event-loop thread and may block briefly. Failures drive the main state
// machine into one of its error states.
pub trait NetdClient: Send {
    fn ip_forwarding_enable(&mut self, tag: &str) -> Result<(), NetdError>;
    fn ip_forwarding_disable(&mut self, tag: &str) -> Result<(), NetdError>;
    fn tether_start(
        &mut self,
        using_legacy_dns_proxy: bool,
        dhcp_ranges: &[String],
    ) -> Result<(), NetdError>;
    fn tether_stop(&mut self) -> Result<(), NetdError>;
    fn tether_dns_set(
        &mut self,
        net_id: u32,
        dns_servers: &[IpAddr],
    ) -> Result<(), NetdError>;
    fn interface_get_list(&mut self) -> Result<Vec<String>, NetdError>;
}

// Network daemon errors.
#[derive(Debug)]
pub enum NetdError {
    ServiceSpecific { code: i32, message: String },
    Io(std::io::Error),
}

// ===== impl NetdError =====

impl std::fmt::Display for NetdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetdError::ServiceSpecific { code, message } => {
                write!(f, "service-specific error {code}: {message}")
            }
            NetdError::Io(..) => {
                write!(f, "network daemon I/O error")
            }
        }
    }
}

impl std::error::Error for NetdError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NetdError::Io(error) => Some(error),
            _ => None,
        }
    }
}

impl From<std::io::Error> for NetdError {
    fn from(error: std::io::Error) -> NetdError {
        NetdError::Io(error)
    }
}
