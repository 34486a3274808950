//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tether_utils::Sender;
use tether_utils::task::TimeoutTask;

use crate::consts::SETTLE_TIME;

//
// Tethering tasks diagram:
//                                +--------------+
//                                |  public API  |
//                                +--------------+
//                                       |
//                            api_tx (1x)|
//                                       V
//                                +--------------+
//               ibus_rx (1x) ->  |              | -> (1x) link commands
//           ipserver_rx (1x) ->  |    master    | -> (Nx) ip server commands
//              retry_timer   ->  |              | -> (Nx) observer callbacks
//                                +--------------+
//

// Tethering inter-task message types.
pub mod messages {
    use serde::{Deserialize, Serialize};

    // Type aliases.
    pub type TimerMsg = input::TimerMsg;

    // Input messages (child task -> main task).
    pub mod input {
        use super::*;

        #[derive(Debug, Deserialize, Serialize)]
        pub enum TimerMsg {
            RetryUpstream,
        }
    }
}

pub use messages::TimerMsg;

// ===== Tethering tasks =====

// Upstream retry timer. Fires once after the settle time; the handle's drop
// cancels it.
pub(crate) fn upstream_retry_timer(
    timer_tx: &Sender<messages::input::TimerMsg>,
) -> TimeoutTask {
    let timer_tx = timer_tx.clone();
    TimeoutTask::new(SETTLE_TIME, move || async move {
        let _ = timer_tx.send(messages::input::TimerMsg::RetryUpstream).await;
    })
}
