//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tether_utils::ipserver::LinkProperties;
use tether_utils::tether::{OffloadStatus, UpstreamNetwork};

// Hardware-offload coordinator interface.
//
// Offload is an external collaborator; the control plane only tells it when
// forwarding becomes wanted and which networks are involved.
pub trait OffloadController: Send {
    fn start(&mut self) -> OffloadStatus;
    fn stop(&mut self);
    fn set_upstream(&mut self, upstream: Option<&UpstreamNetwork>);
    fn downstream_changed(&mut self, lp: &LinkProperties);
}

// Controller used when no offload HAL is present.
#[derive(Debug, Default)]
pub struct NoopOffload();

// ===== impl NoopOffload =====

impl OffloadController for NoopOffload {
    fn start(&mut self) -> OffloadStatus {
        OffloadStatus::Stopped
    }

    fn stop(&mut self) {}

    fn set_upstream(&mut self, _upstream: Option<&UpstreamNetwork>) {}

    fn downstream_changed(&mut self, _lp: &LinkProperties) {}
}
