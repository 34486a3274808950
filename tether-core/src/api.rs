//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use derive_new::new;
use serde::{Deserialize, Serialize};
use tether_utils::UnboundedSender;
use tether_utils::tether::{
    SupportedTypes, TetherError, TetheringRequest, TetheringType,
};
use tokio::sync::{mpsc, oneshot};

use crate::callbacks::{CallbackCookie, CallbackId, CallbackSender};
use crate::links;
use crate::master::{Master, MasterSnapshot};
use crate::request::AddResult;

// Completion listener of an asynchronous API call.
pub type ResultListener = oneshot::Sender<TetherError>;

// Identity of an API caller, as established by the platform's permission
// layer before the call reaches the control plane.
#[derive(Clone, Debug, new)]
#[derive(Deserialize, Serialize)]
pub struct CallerIdentity {
    pub uid: u32,
    pub package_name: String,
    // Carries the SETTINGS privilege, which lifts the uid-match requirement
    // when stopping another caller's request.
    pub privileged: bool,
}

// API requests posted to the master event loop.
#[derive(Debug)]
pub enum ApiMsg {
    StartTethering {
        request: TetheringRequest,
        listener: ResultListener,
    },
    StopTethering {
        tethering_type: TetheringType,
    },
    StopTetheringRequest {
        request: TetheringRequest,
        caller: CallerIdentity,
        listener: ResultListener,
    },
    StopAllTethering,
    RegisterCallback {
        id: CallbackId,
        cookie: CallbackCookie,
        tx: CallbackSender,
    },
    UnregisterCallback {
        id: CallbackId,
    },
    SetPreferTestNetworks {
        prefer: bool,
        listener: ResultListener,
    },
    DumpState {
        reply: oneshot::Sender<MasterSnapshot>,
    },
    Shutdown,
}

/// Clonable handle to the tethering control plane.
///
/// Every method posts a task to the master event loop and returns
/// immediately; completion is delivered through the returned listener.
/// The supported-types bitmap is the single exception: it's read directly
/// from a shared atomic.
#[derive(Clone, Debug)]
pub struct TetheringHandle {
    api_tx: UnboundedSender<ApiMsg>,
    supported: Arc<AtomicU32>,
    next_callback_id: Arc<AtomicUsize>,
}

// ===== impl TetheringHandle =====

impl TetheringHandle {
    pub(crate) fn new(
        api_tx: UnboundedSender<ApiMsg>,
        supported: Arc<AtomicU32>,
    ) -> TetheringHandle {
        TetheringHandle {
            api_tx,
            supported,
            next_callback_id: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Requests tethering of the given request's type. The listener resolves
    /// either synchronously (USB, Ethernet, virtual) or once the link layer
    /// reports the asynchronous outcome (Wi-Fi, Bluetooth).
    pub fn start_tethering(
        &self,
        request: TetheringRequest,
    ) -> oneshot::Receiver<TetherError> {
        let (listener, rx) = oneshot::channel();
        let _ = self.api_tx.send(ApiMsg::StartTethering { request, listener });
        rx
    }

    /// Stops tethering of the given type, dropping its pending and serving
    /// requests. A no-op when the type isn't tethered.
    pub fn stop_tethering(&self, tethering_type: TetheringType) {
        let _ = self.api_tx.send(ApiMsg::StopTethering { tethering_type });
    }

    /// Stops the serving request fuzzy-matching `request`. Resolves with
    /// `UnknownRequest` when no serving request matches.
    pub fn stop_tethering_request(
        &self,
        request: TetheringRequest,
        caller: CallerIdentity,
    ) -> oneshot::Receiver<TetherError> {
        let (listener, rx) = oneshot::channel();
        let _ = self.api_tx.send(ApiMsg::StopTetheringRequest {
            request,
            caller,
            listener,
        });
        rx
    }

    /// Stops every active downstream type.
    pub fn stop_all_tethering(&self) {
        let _ = self.api_tx.send(ApiMsg::StopAllTethering);
    }

    /// Registers an observer. The observer immediately receives a
    /// `Started` snapshot, filtered according to the cookie.
    pub fn register_callback(
        &self,
        cookie: CallbackCookie,
        tx: CallbackSender,
    ) -> CallbackId {
        let id = self.next_callback_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.api_tx.send(ApiMsg::RegisterCallback { id, cookie, tx });
        id
    }

    pub fn unregister_callback(&self, id: CallbackId) {
        let _ = self.api_tx.send(ApiMsg::UnregisterCallback { id });
    }

    /// Forwards the test-network preference to the upstream selector.
    pub fn set_prefer_test_networks(
        &self,
        prefer: bool,
    ) -> oneshot::Receiver<TetherError> {
        let (listener, rx) = oneshot::channel();
        let _ = self
            .api_tx
            .send(ApiMsg::SetPreferTestNetworks { prefer, listener });
        rx
    }

    /// Reads the supported-types bitmap. Safe from any thread.
    pub fn supported_types(&self) -> SupportedTypes {
        SupportedTypes::from_bits_truncate(
            self.supported.load(Ordering::Acquire),
        )
    }

    /// Returns a serializable snapshot of the control-plane state.
    pub async fn dump(&self) -> Option<MasterSnapshot> {
        let (reply, rx) = oneshot::channel();
        let _ = self.api_tx.send(ApiMsg::DumpState { reply });
        rx.await.ok()
    }

    /// Asks the master loop to exit.
    pub fn shutdown(&self) {
        let _ = self.api_tx.send(ApiMsg::Shutdown);
    }
}

// ===== global functions =====

// Creates the API channel pair.
pub(crate) fn api_channel()
-> (UnboundedSender<ApiMsg>, mpsc::UnboundedReceiver<ApiMsg>) {
    mpsc::unbounded_channel()
}

// Resolves a result listener, tolerating callers that went away.
pub(crate) fn reply(listener: ResultListener, result: TetherError) {
    debug_assert!(!result.is_internal());
    let _ = listener.send(result);
}

// Processes a single API request. Returns true when the loop should exit.
pub(crate) fn process_msg(master: &mut Master, msg: ApiMsg) -> bool {
    match msg {
        ApiMsg::StartTethering { request, listener } => {
            start_tethering(master, request, Some(listener));
        }
        ApiMsg::StopTethering { tethering_type } => {
            stop_tethering(master, tethering_type);
        }
        ApiMsg::StopTetheringRequest {
            request,
            caller,
            listener,
        } => {
            stop_tethering_request(master, request, caller, listener);
        }
        ApiMsg::StopAllTethering => {
            stop_all_tethering(master);
        }
        ApiMsg::RegisterCallback { id, cookie, tx } => {
            let started = master.build_started(&cookie);
            master.callbacks.register(id, cookie, tx, started);
        }
        ApiMsg::UnregisterCallback { id } => {
            master.callbacks.unregister(id);
        }
        ApiMsg::SetPreferTestNetworks { prefer, listener } => {
            master.upstream.prefer_test_networks = prefer;
            master.links.upstream_set_prefer_test_networks(prefer);
            reply(listener, TetherError::NoError);
        }
        ApiMsg::DumpState { reply } => {
            let _ = reply.send(master.snapshot());
        }
        ApiMsg::Shutdown => return true,
    }
    false
}

// Entry point of the start path: consult the tracker, then hand the request
// to the matching link adapter.
pub(crate) fn start_tethering(
    master: &mut Master,
    request: TetheringRequest,
    listener: Option<ResultListener>,
) {
    let tethering_type = request.tethering_type;

    if !master.supported_now().contains(tethering_type.supported_flag()) {
        if let Some(listener) = listener {
            reply(listener, TetherError::Unsupported);
        }
        return;
    }

    match master.tracker.add_pending(request.clone()) {
        AddResult::DuplicateError => {
            if let Some(listener) = listener {
                reply(listener, TetherError::DuplicateRequest);
            }
            return;
        }
        AddResult::DuplicateRestart => {
            // An interchangeable request is already in flight: tear the
            // existing tethering down and take its place.
            stop_tethering(master, tethering_type);
            master.tracker.add_pending(request.clone());
        }
        AddResult::Success => {}
    }

    let result = links::start(master, &request);
    match result {
        TetherError::NoError => {
            if let Some(listener) = listener {
                reply(listener, TetherError::NoError);
            }
        }
        TetherError::SoftApCallbackPending => {
            links::wifi::store_pending_listener(master, listener);
        }
        TetherError::BluetoothServicePending => {
            links::bluetooth::store_pending_listener(master, listener);
        }
        error => {
            master.tracker.remove_all_pending(tethering_type);
            if let Some(listener) = listener {
                reply(listener, error);
            }
        }
    }
}

// Removes every pending and serving request of the type and invokes the
// type's disable path. A no-op for a type with nothing tethered.
pub(crate) fn stop_tethering(
    master: &mut Master,
    tethering_type: TetheringType,
) {
    master.tracker.remove_all_pending(tethering_type);
    master.tracker.remove_serving_by_type(tethering_type);
    links::disable(master, tethering_type);
    master.report_state_change();
}

fn stop_tethering_request(
    master: &mut Master,
    request: TetheringRequest,
    caller: CallerIdentity,
    listener: ResultListener,
) {
    let require_uid_match = !caller.privileged;
    match master.tracker.find_fuzzy_serving(&request, require_uid_match) {
        Some(..) => {
            stop_tethering(master, request.tethering_type);
            reply(listener, TetherError::NoError);
        }
        None => reply(listener, TetherError::UnknownRequest),
    }
}

pub(crate) fn stop_all_tethering(master: &mut Master) {
    for tethering_type in master.downstreams.active_types() {
        stop_tethering(master, tethering_type);
    }
    // Pending-only types still need their requests dropped.
    let pending_types = master
        .tracker
        .pending()
        .map(|request| request.tethering_type)
        .collect::<Vec<_>>();
    for tethering_type in pending_types {
        stop_tethering(master, tethering_type);
    }
}

// Downstream-requested type change (e.g. an IP server asking for NCM).
pub(crate) fn change_downstream(
    master: &mut Master,
    tethering_type: TetheringType,
    enable: bool,
) {
    if enable {
        let request = master.tracker.get_or_create_pending(tethering_type);
        start_tethering(master, request, None);
    } else {
        stop_tethering(master, tethering_type);
    }
}
