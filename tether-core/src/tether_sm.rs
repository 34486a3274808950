//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;

use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};
use tether_utils::ibus::UpstreamEvent;
use tether_utils::ipserver::{IpServerId, IpServerMsg, LinkProperties};
use tether_utils::tether::{IpServingState, NetworkId, TetheringType};

use crate::debug::Debug;

// Main tethering states.
//
// The deep state hierarchy of the source maps to tagged variants; per-state
// data lives on the variant. Kernel forwarding and DNS relaying are enabled
// iff the machine is in `Alive`.
#[derive(Clone, Debug, EnumAsInner, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum State {
    Initial,
    Alive(Alive),
    Errored(ErrorKind),
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Alive {
    // Whether the next upstream retry should try a cellular upstream.
    pub try_cell: bool,
}

// The five kernel-call error states.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum ErrorKind {
    SetIpForwardingEnabled,
    SetIpForwardingDisabled,
    StartTethering,
    StopTethering,
    SetDnsForwarders,
}

// Main state machine events.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Event {
    ServingActive {
        server: IpServerId,
        mode: IpServingState,
    },
    ServingInactive {
        server: IpServerId,
    },
    UpstreamChanged,
    UpstreamPermissionChanged,
    RetryUpstream,
    UpstreamCallback(UpstreamEvent),
    ClearError {
        server: IpServerId,
    },
    IfaceUpdateLinkProperties {
        state: IpServingState,
        lp: LinkProperties,
    },
    RequestChangeDownstream {
        tethering_type: TetheringType,
        enable: bool,
    },
    // Synthesized by the effect executor when a kernel call fails.
    KernelError(ErrorKind),
}

// Effects returned by a transition, executed by the master after the state
// swap. The order within the list preserves the enter/exit semantics of the
// source's nested states.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Effect {
    // Fallible kernel calls; a failure is fed back as `Event::KernelError`.
    EnableForwarding,
    StartTethering,
    StopTethering,
    DisableForwarding,
    // Best-effort kernel cleanup on error-state entry; failures are only
    // logged.
    CleanupTether,
    ChooseUpstream { try_cell: bool },
    // Push the current upstream interface set to a newly added server.
    SendUpstreamIfaces { server: IpServerId },
    SendToServer { server: IpServerId, msg: IpServerMsg },
    NotifyAll(IpServerMsg),
    PublishUpstream(Option<NetworkId>),
    StartOffload,
    StopOffload,
    OffloadDownstreamChanged(LinkProperties),
    StartUpstreamObservation,
    StopUpstreamObservation,
    ReleaseCellularPreference,
    CancelRetry,
    ChangeDownstream {
        tethering_type: TetheringType,
        enable: bool,
    },
}

// The main tethering state machine.
//
// `notify_list` is the ordered set of IP servers that have requested serving
// and not yet been torn down; `forwarded` is the subset currently in the
// TETHERED state. The machine is in `Alive` iff `notify_list` is non-empty.
#[derive(Debug)]
pub struct TetherSm {
    state: State,
    notify_list: Vec<IpServerId>,
    forwarded: BTreeSet<IpServerId>,
    // Interface set most recently pushed to the downstreams.
    pub upstream_ifaces: Option<Vec<String>>,
    pub upstream_network: Option<NetworkId>,
}

// ===== impl ErrorKind =====

impl ErrorKind {
    // The notification broadcast to every IP server on error-state entry.
    pub fn server_msg(&self) -> IpServerMsg {
        match self {
            ErrorKind::SetIpForwardingEnabled => {
                IpServerMsg::IpForwardingEnableError
            }
            ErrorKind::SetIpForwardingDisabled => {
                IpServerMsg::IpForwardingDisableError
            }
            ErrorKind::StartTethering => IpServerMsg::StartTetheringError,
            ErrorKind::StopTethering => IpServerMsg::StopTetheringError,
            ErrorKind::SetDnsForwarders => IpServerMsg::SetDnsForwardersError,
        }
    }
}

// ===== impl State =====

impl State {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            State::Initial => "initial",
            State::Alive(..) => "tether-mode-alive",
            State::Errored(ErrorKind::SetIpForwardingEnabled) => {
                "set-ip-forwarding-enabled-error"
            }
            State::Errored(ErrorKind::SetIpForwardingDisabled) => {
                "set-ip-forwarding-disabled-error"
            }
            State::Errored(ErrorKind::StartTethering) => {
                "start-tethering-error"
            }
            State::Errored(ErrorKind::StopTethering) => "stop-tethering-error",
            State::Errored(ErrorKind::SetDnsForwarders) => {
                "set-dns-forwarders-error"
            }
        }
    }
}

// ===== impl TetherSm =====

impl Default for TetherSm {
    fn default() -> TetherSm {
        TetherSm {
            state: State::Initial,
            notify_list: Vec::new(),
            forwarded: BTreeSet::new(),
            upstream_ifaces: None,
            upstream_network: None,
        }
    }
}

impl TetherSm {
    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn notify_list(&self) -> &[IpServerId] {
        &self.notify_list
    }

    // Whether any downstream is in the TETHERED state, i.e. whether an
    // upstream is wanted at all.
    pub fn upstream_wanted(&self) -> bool {
        !self.forwarded.is_empty()
    }

    // Runs a single state transition, swapping the state and returning the
    // effects to execute.
    pub fn dispatch(&mut self, event: Event) -> Vec<Effect> {
        let old_state = self.state.name();

        let effects = match self.state.clone() {
            State::Initial => self.initial(event),
            State::Alive(alive) => self.alive(alive, event),
            State::Errored(kind) => self.errored(kind, event),
        };

        let new_state = self.state.name();
        if old_state != new_state {
            Debug::SmTransition(old_state, new_state).log();
        }

        effects
    }

    fn initial(&mut self, event: Event) -> Vec<Effect> {
        match event {
            Event::ServingActive { server, mode } => {
                self.track_serving(server, mode);
                self.enter_alive()
            }
            Event::ServingInactive { server } => {
                self.untrack_serving(server);
                vec![]
            }
            Event::RequestChangeDownstream {
                tethering_type,
                enable,
            } => {
                vec![Effect::ChangeDownstream {
                    tethering_type,
                    enable,
                }]
            }
            Event::KernelError(kind) => self.enter_errored(kind),
            // Link-properties updates and upstream events are meaningless
            // with no serving downstream.
            _ => vec![],
        }
    }

    fn alive(&mut self, mut alive: Alive, event: Event) -> Vec<Effect> {
        match event {
            Event::ServingActive { server, mode } => {
                let was_wanted = self.upstream_wanted();
                self.track_serving(server, mode);

                let mut effects = vec![Effect::SendUpstreamIfaces { server }];
                if !was_wanted && self.upstream_wanted() {
                    effects.extend([
                        Effect::StartOffload,
                        Effect::StartUpstreamObservation,
                        Effect::ChooseUpstream { try_cell: true },
                    ]);
                }
                effects
            }
            Event::ServingInactive { server } => {
                let was_wanted = self.upstream_wanted();
                self.untrack_serving(server);

                if self.notify_list.is_empty() {
                    let mut effects = self.exit_alive();
                    self.state = State::Initial;
                    // Tear kernel tethering down before giving up
                    // forwarding.
                    effects.extend([
                        Effect::StopTethering,
                        Effect::DisableForwarding,
                    ]);
                    effects
                } else if was_wanted && !self.upstream_wanted() {
                    vec![Effect::ReleaseCellularPreference]
                } else {
                    vec![]
                }
            }
            Event::UpstreamChanged | Event::UpstreamPermissionChanged => {
                if self.upstream_wanted() {
                    vec![Effect::ChooseUpstream { try_cell: true }]
                } else {
                    vec![]
                }
            }
            Event::RetryUpstream => {
                if self.upstream_wanted() {
                    alive.try_cell = !alive.try_cell;
                    let try_cell = alive.try_cell;
                    self.state = State::Alive(alive);
                    vec![Effect::ChooseUpstream { try_cell }]
                } else {
                    vec![]
                }
            }
            Event::UpstreamCallback(callback) => {
                self.upstream_callback(callback)
            }
            Event::IfaceUpdateLinkProperties { state, lp } => {
                if state.is_serving() {
                    vec![Effect::OffloadDownstreamChanged(lp)]
                } else {
                    vec![]
                }
            }
            Event::RequestChangeDownstream {
                tethering_type,
                enable,
            } => {
                vec![Effect::ChangeDownstream {
                    tethering_type,
                    enable,
                }]
            }
            Event::KernelError(kind) => self.enter_errored(kind),
            Event::ClearError { .. } => vec![],
        }
    }

    fn errored(&mut self, kind: ErrorKind, event: Event) -> Vec<Effect> {
        match event {
            Event::ClearError { .. } => {
                self.state = State::Initial;
                vec![]
            }
            // A server requesting serving while errored is told right away.
            Event::ServingActive { server, mode } => {
                self.track_serving(server, mode);
                vec![Effect::SendToServer {
                    server,
                    msg: kind.server_msg(),
                }]
            }
            Event::ServingInactive { server } => {
                self.untrack_serving(server);
                vec![]
            }
            Event::KernelError(new_kind) => {
                // Remain errored; re-broadcast for the new failure.
                self.state = State::Errored(new_kind);
                vec![Effect::NotifyAll(new_kind.server_msg())]
            }
            _ => vec![],
        }
    }

    // Sub-handler for upstream selector callbacks. The selector cache is
    // updated by the caller before dispatch; re-running upstream selection
    // is safe because `choose_upstream` is idempotent for identical inputs.
    fn upstream_callback(&mut self, callback: UpstreamEvent) -> Vec<Effect> {
        if !self.upstream_wanted() {
            return vec![];
        }
        match callback {
            UpstreamEvent::Changed(..)
            | UpstreamEvent::DefaultSwitched(..)
            | UpstreamEvent::LinkPropertiesChanged(..) => {
                vec![Effect::ChooseUpstream { try_cell: true }]
            }
            UpstreamEvent::Lost(network) => {
                if self.upstream_network == Some(network) {
                    vec![Effect::ChooseUpstream { try_cell: true }]
                } else {
                    vec![]
                }
            }
            UpstreamEvent::PermissionChanged => {
                vec![Effect::ChooseUpstream { try_cell: true }]
            }
        }
    }

    fn track_serving(&mut self, server: IpServerId, mode: IpServingState) {
        if !self.notify_list.contains(&server) {
            self.notify_list.push(server);
        }
        if mode == IpServingState::Tethered {
            self.forwarded.insert(server);
        } else {
            self.forwarded.remove(&server);
        }
    }

    fn untrack_serving(&mut self, server: IpServerId) {
        self.notify_list.retain(|id| *id != server);
        self.forwarded.remove(&server);
    }

    // Entry effects of TetherModeAlive.
    fn enter_alive(&mut self) -> Vec<Effect> {
        self.state = State::Alive(Alive { try_cell: true });

        let mut effects = vec![Effect::EnableForwarding, Effect::StartTethering];
        if self.upstream_wanted() {
            effects.extend([
                Effect::StartOffload,
                Effect::StartUpstreamObservation,
                Effect::ChooseUpstream { try_cell: true },
            ]);
        }
        effects
    }

    // Exit effects of TetherModeAlive: stop offload and upstream
    // observation, notify downstreams of the null upstream, publish it, and
    // reset the upstream snapshot.
    fn exit_alive(&mut self) -> Vec<Effect> {
        self.upstream_ifaces = None;
        self.upstream_network = None;
        vec![
            Effect::CancelRetry,
            Effect::StopOffload,
            Effect::StopUpstreamObservation,
            Effect::NotifyAll(IpServerMsg::TetherConnectionChanged {
                upstream_ifaces: None,
            }),
            Effect::PublishUpstream(None),
        ]
    }

    // Entry effects of the error states: broadcast the error to every IP
    // server and attempt best-effort kernel cleanup.
    fn enter_errored(&mut self, kind: ErrorKind) -> Vec<Effect> {
        self.state = State::Errored(kind);
        self.upstream_ifaces = None;
        self.upstream_network = None;
        vec![
            Effect::CancelRetry,
            Effect::StopOffload,
            Effect::StopUpstreamObservation,
            Effect::NotifyAll(kind.server_msg()),
            Effect::CleanupTether,
        ]
    }
}

// ===== tests =====
