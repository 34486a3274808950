//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tether_utils::ibus::UpstreamEvent;
use tether_utils::ipserver::IpServerMsg;
use tether_utils::tether::UpstreamNetwork;

use crate::debug::Debug;
use crate::error::Error;
use crate::master::Master;
use crate::tasks;
use crate::tether_sm::ErrorKind;

// Cached view of the upstream selector.
//
// The selector itself (network scoring, test-network policy, cellular
// fallback) lives outside the control plane; this is the latest state it
// advertised over the bus, plus the hints the control plane has pushed back.
#[derive(Debug, Default)]
pub struct UpstreamState {
    current: Option<UpstreamNetwork>,
    pub prefer_test_networks: bool,
    pub cellular_requested: bool,
    pub observing: bool,
}

// ===== impl UpstreamState =====

impl UpstreamState {
    // Folds a selector notification into the cache.
    pub(crate) fn update(&mut self, event: &UpstreamEvent) {
        match event {
            UpstreamEvent::Changed(network)
            | UpstreamEvent::DefaultSwitched(network) => {
                self.current = network.clone();
            }
            UpstreamEvent::LinkPropertiesChanged(network) => {
                self.current = Some(network.clone());
            }
            UpstreamEvent::Lost(network) => {
                if self
                    .current
                    .as_ref()
                    .is_some_and(|current| current.network == *network)
                {
                    self.current = None;
                }
            }
            UpstreamEvent::PermissionChanged => {}
        }
    }

    pub(crate) fn preferred(&self) -> Option<&UpstreamNetwork> {
        self.current.as_ref()
    }
}

// ===== global functions =====

// Selects and applies an upstream. Idempotent for identical inputs, which
// is what keeps repeated selector callbacks from disturbing a settled
// downstream set.
pub(crate) fn choose_upstream(master: &mut Master, try_cell: bool) {
    match master.upstream.preferred().cloned() {
        Some(network) => set_upstream(master, network),
        None => {
            // Withdraw a previously selected upstream before falling back.
            if master.sm.upstream_network.is_some() {
                clear_upstream(master);
            }
            if try_cell {
                // Hint the selector towards cellular and wait for it to
                // advertise; the retry timer belongs to the non-cellular
                // attempt only.
                if !master.upstream.cellular_requested {
                    master.links.upstream_set_cellular_preference(true);
                    master.upstream.cellular_requested = true;
                }
            } else {
                schedule_retry(master);
            }
        }
    }
}

// Applies the given upstream: program the DNS forwarders, remember the
// interface set and fan it out to every downstream exactly once.
fn set_upstream(master: &mut Master, network: UpstreamNetwork) {
    let ifaces = network.interface_set();
    if master.sm.upstream_network == Some(network.network)
        && master.sm.upstream_ifaces.as_deref() == Some(&ifaces[..])
    {
        return;
    }

    let dns_servers = if network.dns_servers.is_empty() {
        master.config.default_ipv4_dns.clone()
    } else {
        network.dns_servers.clone()
    };
    if let Err(error) =
        master.netd.tether_dns_set(network.network.0, &dns_servers)
    {
        Error::NetdCall {
            verb: "tetherDnsSet",
            error,
        }
        .log();
        master.kernel_error(ErrorKind::SetDnsForwarders);
        return;
    }

    // A usable upstream arrived; the pending retry is obsolete.
    master.retry_timer = None;
    master.sm.upstream_network = Some(network.network);
    master.sm.upstream_ifaces = Some(ifaces.clone());
    Debug::UpstreamSelected(Some(network.network)).log();

    for server in master.sm.notify_list().to_vec() {
        master.send_to_server(
            server,
            IpServerMsg::TetherConnectionChanged {
                upstream_ifaces: Some(ifaces.clone()),
            },
        );
    }
    master.offload.set_upstream(Some(&network));
    master.callbacks.report_upstream(Some(network.network));
}

// Withdraws the current upstream from every downstream.
fn clear_upstream(master: &mut Master) {
    master.sm.upstream_network = None;
    master.sm.upstream_ifaces = None;
    Debug::UpstreamSelected(None).log();

    for server in master.sm.notify_list().to_vec() {
        master.send_to_server(
            server,
            IpServerMsg::TetherConnectionChanged {
                upstream_ifaces: None,
            },
        );
    }
    master.offload.set_upstream(None);
    master.callbacks.report_upstream(None);
}

// Schedules the single pending upstream retry. A previously scheduled retry
// is replaced.
fn schedule_retry(master: &mut Master) {
    master.retry_timer = Some(tasks::upstream_retry_timer(&master.timer_tx));
    Debug::UpstreamRetryScheduled.log();
}
