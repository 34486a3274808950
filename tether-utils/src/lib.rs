//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod ibus;
pub mod ipserver;
pub mod mac_addr;
pub mod netd;
pub mod task;
pub mod tether;

// Useful type definition(s).
pub type Sender<T> = tokio::sync::mpsc::Sender<T>;
pub type Receiver<T> = tokio::sync::mpsc::Receiver<T>;
pub type UnboundedSender<T> = tokio::sync::mpsc::UnboundedSender<T>;
pub type UnboundedReceiver<T> = tokio::sync::mpsc::UnboundedReceiver<T>;
