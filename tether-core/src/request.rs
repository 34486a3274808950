//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use chrono::{DateTime, Utc};
use derive_new::new;
use serde::{Deserialize, Serialize};
use tether_utils::ipserver::IpServerId;
use tether_utils::tether::{RequestType, TetheringRequest, TetheringType};

use crate::debug::Debug;

// Outcome of attempting to add a pending request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddResult {
    // The request was appended to the pending list.
    Success,
    // An interchangeable request of the same type is already pending; the
    // caller must tear the existing tethering down and retry.
    DuplicateRestart,
    // A conflicting request of the same type is already pending; the caller
    // must reject with DUPLICATE_REQUEST.
    DuplicateError,
}

// A request that has been promoted to serving, together with its promotion
// time (used as the fuzzy-match tie-break).
#[derive(Clone, Debug, new)]
#[derive(Deserialize, Serialize)]
pub struct ServingEntry {
    pub request: TetheringRequest,
    pub promoted_at: DateTime<Utc>,
}

// Tracker of pending and serving tethering requests.
//
// Pending requests form an ordered list with at most one entry per type;
// serving requests are keyed by the IP server realizing them.
#[derive(Debug, Default)]
pub struct RequestTracker {
    pending: Vec<TetheringRequest>,
    serving: BTreeMap<IpServerId, ServingEntry>,
    // Serving uniqueness keyed by (type, uid) instead of type alone.
    request_per_uid: bool,
}

// ===== impl RequestTracker =====

impl RequestTracker {
    pub fn new(request_per_uid: bool) -> RequestTracker {
        RequestTracker {
            pending: Vec::new(),
            serving: BTreeMap::new(),
            request_per_uid,
        }
    }

    // Attempts to add a pending request, enforcing per-type uniqueness.
    //
    // The pending list is left untouched unless `Success` is returned.
    pub fn add_pending(&mut self, request: TetheringRequest) -> AddResult {
        if let Some(existing) = self.next_pending(request.tethering_type) {
            if existing.equals_ignoring_identity(&request) {
                return AddResult::DuplicateRestart;
            }
            return AddResult::DuplicateError;
        }

        Debug::PendingAdded(&request).log();
        self.pending
            .retain(|req| req.tethering_type != request.tethering_type);
        self.pending.push(request);
        AddResult::Success
    }

    // Returns the first pending request of the given type.
    pub fn next_pending(
        &self,
        tethering_type: TetheringType,
    ) -> Option<&TetheringRequest> {
        self.pending
            .iter()
            .find(|req| req.tethering_type == tethering_type)
    }

    // Returns the pending request of the given type, or synthesizes a
    // placeholder with the default scope. The pending list is not modified.
    pub fn get_or_create_pending(
        &self,
        tethering_type: TetheringType,
    ) -> TetheringRequest {
        self.next_pending(tethering_type)
            .cloned()
            .unwrap_or_else(|| TetheringRequest::placeholder(tethering_type))
    }

    // Removes every pending request of the given type.
    pub fn remove_all_pending(&mut self, tethering_type: TetheringType) {
        self.pending
            .retain(|req| req.tethering_type != tethering_type);
    }

    // Promotes a request into the serving map. Idempotent: re-promoting the
    // same request keeps the original promotion time; a changed request
    // replaces the entry.
    pub fn promote_to_serving(
        &mut self,
        server: IpServerId,
        request: TetheringRequest,
    ) {
        match self.serving.entry(server) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().request != request {
                    occupied.insert(ServingEntry::new(request, Utc::now()));
                }
            }
            Entry::Vacant(vacant) => {
                Debug::RequestPromoted(request.tethering_type, server).log();
                vacant.insert(ServingEntry::new(request, Utc::now()));
            }
        }
    }

    // Drops the serving request of the given IP server, if any.
    pub fn remove_serving(&mut self, server: IpServerId) {
        self.serving.remove(&server);
    }

    // Drops every serving request of the given type, returning the affected
    // IP servers.
    pub fn remove_serving_by_type(
        &mut self,
        tethering_type: TetheringType,
    ) -> Vec<IpServerId> {
        let servers = self
            .serving
            .iter()
            .filter(|(_, entry)| {
                entry.request.tethering_type == tethering_type
            })
            .map(|(server, _)| *server)
            .collect::<Vec<_>>();
        for server in &servers {
            self.serving.remove(server);
        }
        servers
    }

    // Returns the serving entry of the given IP server.
    pub fn serving_request(&self, server: IpServerId) -> Option<&ServingEntry> {
        self.serving.get(&server)
    }

    // Finds the serving request fuzzy-matching `request`: same type, same
    // uid when required, and a matching soft-AP configuration when the
    // incoming request carries one. A placeholder never matches an explicit
    // request. Ties are broken towards the earliest promoted entry.
    pub fn find_fuzzy_serving(
        &self,
        request: &TetheringRequest,
        require_uid_match: bool,
    ) -> Option<(IpServerId, &ServingEntry)> {
        self.serving
            .iter()
            .filter(|(_, entry)| {
                let serving = &entry.request;
                if serving.tethering_type != request.tethering_type {
                    return false;
                }
                if (serving.request_type == RequestType::Placeholder)
                    != (request.request_type == RequestType::Placeholder)
                {
                    return false;
                }
                if require_uid_match && serving.uid != request.uid {
                    return false;
                }
                if request.soft_ap_config.is_some()
                    && serving.soft_ap_config != request.soft_ap_config
                {
                    return false;
                }
                true
            })
            .min_by_key(|(_, entry)| entry.promoted_at)
            .map(|(server, entry)| (*server, entry))
    }

    // Finds a serving entry conflicting with the given request under the
    // serving-uniqueness rule: one per (type, uid) in per-uid mode, one per
    // type otherwise.
    pub fn find_serving_conflict(
        &self,
        request: &TetheringRequest,
    ) -> Option<IpServerId> {
        self.serving
            .iter()
            .find(|(_, entry)| {
                entry.request.tethering_type == request.tethering_type
                    && (!self.request_per_uid
                        || entry.request.uid == request.uid)
            })
            .map(|(server, _)| *server)
    }

    // Returns an iterator visiting all pending requests in insertion order.
    pub fn pending(&self) -> impl Iterator<Item = &'_ TetheringRequest> + '_ {
        self.pending.iter()
    }

    // Returns an iterator visiting all serving entries.
    pub fn serving(
        &self,
    ) -> impl Iterator<Item = (IpServerId, &'_ ServingEntry)> + '_ {
        self.serving.iter().map(|(server, entry)| (*server, entry))
    }
}

// ===== tests =====
