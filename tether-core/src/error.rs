//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tether_utils::netd::NetdError;
use tether_utils::tether::TetheringType;
use tracing::{warn, warn_span};

// Tethering control-plane errors.
#[derive(Debug)]
pub enum Error {
    // Kernel/network daemon errors
    NetdCall {
        verb: &'static str,
        error: NetdError,
    },

    // other errors
    InvalidIfaceRegex {
        pattern: String,
        error: regex::Error,
    },
    UntetherableInterface(String),
    NoTetherableInterface(TetheringType),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::NetdCall { verb, error } => {
                warn_span!("netd", %verb).in_scope(|| {
                    warn!(error = %with_source(error), "{}", self);
                });
            }
            Error::InvalidIfaceRegex { pattern, error } => {
                warn!(%pattern, %error, "{}", self);
            }
            Error::UntetherableInterface(ifname) => {
                warn!(%ifname, "{}", self);
            }
            Error::NoTetherableInterface(tethering_type) => {
                warn!(r#type = %tethering_type, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NetdCall { .. } => {
                write!(f, "network daemon call failed")
            }
            Error::InvalidIfaceRegex { .. } => {
                write!(f, "invalid interface name pattern")
            }
            Error::UntetherableInterface(..) => {
                write!(f, "interface matches no tetherable type")
            }
            Error::NoTetherableInterface(..) => {
                write!(f, "no kernel interface matches the requested type")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::NetdCall { error, .. } => Some(error),
            Error::InvalidIfaceRegex { error, .. } => Some(error),
            _ => None,
        }
    }
}

// ===== global functions =====

fn with_source<E: std::error::Error>(error: E) -> String {
    if let Some(source) = error.source() {
        format!("{} ({})", error, with_source(source))
    } else {
        error.to_string()
    }
}
