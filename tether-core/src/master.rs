//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tether_utils::ibus::{IbusReceiver, LinkChannelsTx};
use tether_utils::ipserver::{
    IpServerEventReceiver, IpServerEventSender, IpServerFactory, IpServerId,
    IpServerMsg,
};
use tether_utils::netd::{NetdClient, NetdError};
use tether_utils::task::TimeoutTask;
use tether_utils::tether::{
    CallbackStarted, IpServingState, NetworkId, OffloadStatus, SupportedTypes,
    TetherError, TetheredClient, TetheringInterface, TetheringRequest,
    TetheringType,
};
use tether_utils::{Receiver, Sender, UnboundedReceiver};
use tokio::sync::mpsc;
use tracing::{Instrument, debug_span};

use crate::api::{self, ApiMsg, TetheringHandle};
use crate::callbacks::{CallbackCookie, CallbackRegistry, StateEntry, filter_states};
use crate::config::TetheringConfig;
use crate::consts::FORWARDING_TAG;
use crate::downstream::Downstreams;
use crate::error::Error;
use crate::events;
use crate::links::bluetooth::BluetoothAdapter;
use crate::links::wifi::WifiAdapter;
use crate::offload::OffloadController;
use crate::request::RequestTracker;
use crate::tasks::TimerMsg;
use crate::tether_sm::{Effect, ErrorKind, Event, TetherSm};
use crate::upstream::{self, UpstreamState};

pub struct Master {
    // Runtime configuration.
    pub config: TetheringConfig,
    // Kernel/network daemon client.
    pub netd: Box<dyn NetdClient>,
    // IP server constructor.
    pub factory: Box<dyn IpServerFactory>,
    // Hardware-offload coordinator.
    pub offload: Box<dyn OffloadController>,
    // Link-layer command channels.
    pub links: LinkChannelsTx,
    // Pending and serving requests.
    pub tracker: RequestTracker,
    // Downstream registry.
    pub downstreams: Downstreams,
    // Main tethering state machine.
    pub sm: TetherSm,
    // Upstream selector cache.
    pub upstream: UpstreamState,
    // Observer registry.
    pub callbacks: CallbackRegistry,
    // Link adapter state.
    pub wifi: WifiAdapter,
    pub bluetooth: BluetoothAdapter,
    // Connected clients per downstream interface.
    pub clients: BTreeMap<String, Vec<TetheredClient>>,
    // Tethering policy gates.
    pub restricted: bool,
    pub data_saver: bool,
    // Tx channel handed to every IP server.
    pub ipserver_tx: IpServerEventSender,
    // Tx channel of the timer task.
    pub timer_tx: Sender<TimerMsg>,
    // Pending upstream retry (at most one).
    pub retry_timer: Option<TimeoutTask>,
}

// Serializable control-plane snapshot, as produced for the daemon's dump
// handler.
#[derive(Debug, Serialize)]
pub struct MasterSnapshot {
    pub state: String,
    pub notify_list: Vec<IpServerId>,
    pub upstream_network: Option<NetworkId>,
    pub upstream_retry_pending: bool,
    pub pending: Vec<TetheringRequest>,
    pub serving: Vec<ServingSnapshot>,
    pub downstreams: Vec<DownstreamSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct ServingSnapshot {
    pub server: IpServerId,
    pub request: TetheringRequest,
    pub promoted_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct DownstreamSnapshot {
    pub ifname: String,
    pub tethering_type: TetheringType,
    pub state: IpServingState,
    pub last_error: TetherError,
    pub is_ncm: bool,
    pub state_changes: u32,
}

// ===== impl Master =====

impl Master {
    async fn run(
        &mut self,
        mut api_rx: UnboundedReceiver<ApiMsg>,
        mut ibus_rx: IbusReceiver,
        mut ipserver_rx: IpServerEventReceiver,
        mut timer_rx: Receiver<TimerMsg>,
    ) {
        loop {
            // Link-layer and IP-server events outrank API requests, so an
            // API call always observes the platform state that preceded it.
            tokio::select! {
                biased;
                Some(msg) = ibus_rx.recv() => {
                    events::process_ibus_msg(self, msg);
                }
                Some(msg) = ipserver_rx.recv() => {
                    events::process_ipserver_msg(self, msg);
                }
                Some(msg) = timer_rx.recv() => {
                    events::process_timer_msg(self, msg);
                }
                Some(msg) = api_rx.recv() => {
                    if api::process_msg(self, msg) {
                        return;
                    }
                }
                else => return,
            }
        }
    }

    // Runs a state machine transition and executes the resulting effects.
    pub(crate) fn dispatch_sm(&mut self, event: Event) {
        let effects = self.sm.dispatch(event);
        self.execute_effects(effects);
    }

    fn execute_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            self.execute_effect(effect);
        }
    }

    fn execute_effect(&mut self, effect: Effect) {
        match effect {
            Effect::EnableForwarding => {
                if let Err(error) =
                    self.netd.ip_forwarding_enable(FORWARDING_TAG)
                {
                    Error::NetdCall {
                        verb: "ipForwardingEnable",
                        error,
                    }
                    .log();
                    self.kernel_error(ErrorKind::SetIpForwardingEnabled);
                }
            }
            Effect::StartTethering => {
                if let Err(error) = self.tether_start() {
                    Error::NetdCall {
                        verb: "tetherStart",
                        error,
                    }
                    .log();
                    // One stop+start retry before giving up.
                    let _ = self.netd.tether_stop();
                    if let Err(error) = self.tether_start() {
                        Error::NetdCall {
                            verb: "tetherStart",
                            error,
                        }
                        .log();
                        self.kernel_error(ErrorKind::StartTethering);
                    }
                }
            }
            Effect::StopTethering => {
                if let Err(error) = self.netd.tether_stop() {
                    Error::NetdCall {
                        verb: "tetherStop",
                        error,
                    }
                    .log();
                    self.kernel_error(ErrorKind::StopTethering);
                }
            }
            Effect::DisableForwarding => {
                if let Err(error) =
                    self.netd.ip_forwarding_disable(FORWARDING_TAG)
                {
                    Error::NetdCall {
                        verb: "ipForwardingDisable",
                        error,
                    }
                    .log();
                    self.kernel_error(ErrorKind::SetIpForwardingDisabled);
                }
            }
            Effect::CleanupTether => {
                // Best-effort; the machine is already in an error state.
                if let Err(error) = self.netd.tether_stop() {
                    Error::NetdCall {
                        verb: "tetherStop",
                        error,
                    }
                    .log();
                }
                if let Err(error) =
                    self.netd.ip_forwarding_disable(FORWARDING_TAG)
                {
                    Error::NetdCall {
                        verb: "ipForwardingDisable",
                        error,
                    }
                    .log();
                }
            }
            Effect::ChooseUpstream { try_cell } => {
                upstream::choose_upstream(self, try_cell);
            }
            Effect::SendUpstreamIfaces { server } => {
                let upstream_ifaces = self.sm.upstream_ifaces.clone();
                self.send_to_server(
                    server,
                    IpServerMsg::TetherConnectionChanged { upstream_ifaces },
                );
            }
            Effect::SendToServer { server, msg } => {
                self.send_to_server(server, msg);
            }
            Effect::NotifyAll(msg) => {
                for server in self.sm.notify_list().to_vec() {
                    self.send_to_server(server, msg.clone());
                }
            }
            Effect::PublishUpstream(network) => {
                self.callbacks.report_upstream(network);
            }
            Effect::StartOffload => {
                let status = self.offload.start();
                self.callbacks.report_offload(status);
            }
            Effect::StopOffload => {
                self.offload.stop();
                self.callbacks.report_offload(OffloadStatus::Stopped);
            }
            Effect::OffloadDownstreamChanged(lp) => {
                self.offload.downstream_changed(&lp);
            }
            Effect::StartUpstreamObservation => {
                self.links.upstream_start_observation();
                self.upstream.observing = true;
            }
            Effect::StopUpstreamObservation => {
                self.links.upstream_stop_observation();
                self.upstream.observing = false;
                self.release_cellular_preference();
            }
            Effect::ReleaseCellularPreference => {
                self.release_cellular_preference();
            }
            Effect::CancelRetry => {
                self.retry_timer = None;
            }
            Effect::ChangeDownstream {
                tethering_type,
                enable,
            } => {
                api::change_downstream(self, tethering_type, enable);
            }
        }
    }

    fn tether_start(&mut self) -> Result<(), NetdError> {
        let dhcp_ranges = if self.config.legacy_dhcp_server {
            self.config.legacy_dhcp_ranges.clone()
        } else {
            Vec::new()
        };
        self.netd
            .tether_start(self.config.legacy_dhcp_server, &dhcp_ranges)
    }

    // Feeds a kernel failure back into the state machine.
    pub(crate) fn kernel_error(&mut self, kind: ErrorKind) {
        self.dispatch_sm(Event::KernelError(kind));
    }

    pub(crate) fn send_to_server(&mut self, server: IpServerId, msg: IpServerMsg) {
        if let Some((_, downstream)) = self.downstreams.get_by_id(server) {
            downstream.server.send(msg);
        }
    }

    fn release_cellular_preference(&mut self) {
        if self.upstream.cellular_requested {
            self.links.upstream_set_cellular_preference(false);
            self.upstream.cellular_requested = false;
        }
    }

    // Stops the IP server of the interface and forgets everything attached
    // to it. Idempotent.
    pub(crate) fn ensure_ip_server_stopped(&mut self, ifname: &str) {
        let Some(server) = self.downstreams.ensure_stopped(ifname) else {
            return;
        };
        self.tracker.remove_serving(server);
        self.clients.remove(ifname);
        // The server won't report again; retire it from the state machine
        // right away.
        self.dispatch_sm(Event::ServingInactive { server });
        self.report_state_change();
    }

    // Asks the IP server to leave the serving state gracefully, dropping
    // its serving request.
    pub(crate) fn ensure_ip_server_unwanted(&mut self, server: IpServerId) {
        self.tracker.remove_serving(server);
        if let Some((_, downstream)) = self.downstreams.get_by_id(server) {
            downstream.server.unwanted();
        }
    }

    // The currently supported types; empty while a policy gate is active.
    pub(crate) fn supported_now(&self) -> SupportedTypes {
        if self.restricted || self.data_saver {
            SupportedTypes::empty()
        } else {
            self.config.supported_types()
        }
    }

    // Re-derives the tether states and fans them out to the observers.
    pub(crate) fn report_state_change(&mut self) {
        let entries = self.build_state_entries();
        self.callbacks.report_states(&entries);
    }

    pub(crate) fn build_state_entries(&self) -> Vec<StateEntry> {
        self.downstreams
            .iter()
            .map(|(ifname, downstream)| {
                let serving =
                    self.tracker.serving_request(downstream.server.id);
                let iface = TetheringInterface {
                    tethering_type: downstream.server.tethering_type,
                    ifname: ifname.to_owned(),
                    soft_ap_config: serving
                        .and_then(|entry| entry.request.soft_ap_config.clone()),
                };
                StateEntry::new(
                    iface,
                    serving.and_then(|entry| entry.request.uid),
                    downstream.last_state,
                    downstream.last_error,
                )
            })
            .collect()
    }

    // Builds the started snapshot of a newly registered observer.
    pub(crate) fn build_started(
        &self,
        cookie: &CallbackCookie,
    ) -> CallbackStarted {
        let entries = self.build_state_entries();
        CallbackStarted {
            supported_types: self.supported_now(),
            upstream_network: self.callbacks.last_upstream(),
            config: self.config.snapshot(),
            states: filter_states(&entries, cookie),
            tethered_clients: if cookie.privileged {
                self.all_clients()
            } else {
                Vec::new()
            },
            offload_status: self.callbacks.last_offload(),
        }
    }

    pub(crate) fn all_clients(&self) -> Vec<TetheredClient> {
        self.clients.values().flatten().cloned().collect()
    }

    pub(crate) fn snapshot(&self) -> MasterSnapshot {
        MasterSnapshot {
            state: self.sm.state().name().to_owned(),
            notify_list: self.sm.notify_list().to_vec(),
            upstream_network: self.sm.upstream_network,
            upstream_retry_pending: self.retry_timer.is_some(),
            pending: self.tracker.pending().cloned().collect(),
            serving: self
                .tracker
                .serving()
                .map(|(server, entry)| ServingSnapshot {
                    server,
                    request: entry.request.clone(),
                    promoted_at: entry.promoted_at,
                })
                .collect(),
            downstreams: self
                .downstreams
                .iter()
                .map(|(ifname, downstream)| DownstreamSnapshot {
                    ifname: ifname.to_owned(),
                    tethering_type: downstream.server.tethering_type,
                    state: downstream.last_state,
                    last_error: downstream.last_error,
                    is_ncm: downstream.is_ncm,
                    state_changes: downstream.state_changes,
                })
                .collect(),
        }
    }
}

// ===== global functions =====

// Spawns the master event loop and returns the public API handle.
pub fn start(
    config: TetheringConfig,
    netd: Box<dyn NetdClient>,
    factory: Box<dyn IpServerFactory>,
    offload: Box<dyn OffloadController>,
    links: LinkChannelsTx,
    ibus_rx: IbusReceiver,
) -> TetheringHandle {
    let (api_tx, api_rx) = api::api_channel();
    let (ipserver_tx, ipserver_rx) = mpsc::unbounded_channel();
    let (timer_tx, timer_rx) = mpsc::channel(4);

    let tracker = RequestTracker::new(config.request_per_uid);
    let mut master = Master {
        config,
        netd,
        factory,
        offload,
        links,
        tracker,
        downstreams: Default::default(),
        sm: Default::default(),
        upstream: Default::default(),
        callbacks: Default::default(),
        wifi: Default::default(),
        bluetooth: Default::default(),
        clients: Default::default(),
        restricted: false,
        data_saver: false,
        ipserver_tx,
        timer_tx,
        retry_timer: None,
    };

    let supported = master.callbacks.supported_handle();
    let initial = master.supported_now();
    master.callbacks.publish_supported(initial);

    let handle = TetheringHandle::new(api_tx, supported);

    tokio::spawn(async move {
        let span = debug_span!("tethering");
        master
            .run(api_rx, ibus_rx, ipserver_rx, timer_rx)
            .instrument(span)
            .await;
    });

    handle
}
