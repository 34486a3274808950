//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tether_utils::ipserver::IpServerId;
use tether_utils::tether::{NetworkId, TetheringRequest, TetheringType};
use tracing::{debug, debug_span, warn};

use crate::callbacks::CallbackId;

// Tethering debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    PendingAdded(&'a TetheringRequest),
    RequestPromoted(TetheringType, IpServerId),
    IpServerStarted(&'a str, TetheringType),
    IpServerStopped(&'a str),
    StaleIpServerEvent(&'a str, IpServerId),
    SmTransition(&'a str, &'a str),
    UpstreamSelected(Option<NetworkId>),
    UpstreamRetryScheduled,
    PlaceholderEnabled(&'a str),
    CallbackRegistered(CallbackId),
    CallbackUnregistered(CallbackId),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::PendingAdded(request) => {
                debug_span!("tracker").in_scope(|| {
                    debug!(r#type = %request.tethering_type, "{}", self);
                });
            }
            Debug::RequestPromoted(tethering_type, server) => {
                debug_span!("tracker").in_scope(|| {
                    debug!(r#type = %tethering_type, %server, "{}", self);
                });
            }
            Debug::IpServerStarted(ifname, tethering_type) => {
                debug_span!("downstream", %ifname).in_scope(|| {
                    debug!(r#type = %tethering_type, "{}", self);
                });
            }
            Debug::IpServerStopped(ifname) => {
                debug_span!("downstream", %ifname).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::StaleIpServerEvent(ifname, server) => {
                debug_span!("downstream", %ifname).in_scope(|| {
                    debug!(%server, "{}", self);
                });
            }
            Debug::SmTransition(old_state, new_state) => {
                debug_span!("tether-sm").in_scope(|| {
                    debug!(%old_state, %new_state, "{}", self);
                });
            }
            Debug::UpstreamSelected(network) => {
                debug_span!("upstream").in_scope(|| {
                    debug!(?network, "{}", self);
                });
            }
            Debug::UpstreamRetryScheduled => {
                debug_span!("upstream").in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::PlaceholderEnabled(ifname) => {
                // Serving without a real request is unexpected but not
                // fatal; surfaced at warn level for telemetry.
                warn!(%ifname, "{}", self);
            }
            Debug::CallbackRegistered(id) | Debug::CallbackUnregistered(id) => {
                debug_span!("callbacks").in_scope(|| {
                    debug!(%id, "{}", self);
                });
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::PendingAdded(..) => {
                write!(f, "pending request added")
            }
            Debug::RequestPromoted(..) => {
                write!(f, "request promoted to serving")
            }
            Debug::IpServerStarted(..) => {
                write!(f, "ip server started")
            }
            Debug::IpServerStopped(..) => {
                write!(f, "ip server stopped")
            }
            Debug::StaleIpServerEvent(..) => {
                write!(f, "ignoring event from replaced ip server")
            }
            Debug::SmTransition(..) => {
                write!(f, "state transition")
            }
            Debug::UpstreamSelected(..) => {
                write!(f, "upstream selected")
            }
            Debug::UpstreamRetryScheduled => {
                write!(f, "upstream retry scheduled")
            }
            Debug::PlaceholderEnabled(..) => {
                write!(f, "ip serving enabled with placeholder request")
            }
            Debug::CallbackRegistered(..) => {
                write!(f, "callback registered")
            }
            Debug::CallbackUnregistered(..) => {
                write!(f, "callback unregistered")
            }
        }
    }
}
