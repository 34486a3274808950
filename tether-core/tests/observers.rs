//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod common;

use common::{Harness, wifi_request};
use tether_core::callbacks::{CallbackCookie, TetheringEvent};
use tether_utils::ibus::{IbusMsg, WifiApState};
use tether_utils::ipserver::{IpServerEvent, IpServerEventMsg};
use tether_utils::mac_addr::MacAddr;
use tether_utils::tether::{
    IpServingState, TetherError, TetheredClient, TetheringType,
};
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;

fn drain(rx: &mut UnboundedReceiver<TetheringEvent>) -> Vec<TetheringEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// Input:
//  * An observer registers before anything is tethered
// Output:
//  * It immediately receives a Started snapshot with the supported types
//    and the configuration
#[tokio::test]
async fn started_snapshot_on_register() {
    let harness = Harness::start();

    let (tx, mut rx) = mpsc::unbounded_channel();
    harness
        .handle
        .register_callback(CallbackCookie::new(1000, false), tx);
    harness.fence().await;

    let events = drain(&mut rx);
    let TetheringEvent::Started(started) = &events[0] else {
        panic!("expected a started snapshot");
    };
    assert!(!started.supported_types.is_empty());
    assert!(!started.config.tetherable_wifi_regexs.is_empty());
    assert!(started.states.tethered.is_empty());
}

// Input:
//  * A serving Wi-Fi downstream with a soft-AP config owned by uid 1000;
//    three observers: the owner, a privileged one, and a third party
// Output:
//  * Only the owner and the privileged observer see the soft-AP config
#[tokio::test]
async fn soft_ap_config_visibility() {
    let harness = Harness::start();

    let (owner_tx, mut owner_rx) = mpsc::unbounded_channel();
    let (system_tx, mut system_rx) = mpsc::unbounded_channel();
    let (other_tx, mut other_rx) = mpsc::unbounded_channel();
    harness
        .handle
        .register_callback(CallbackCookie::new(1000, false), owner_tx);
    harness
        .handle
        .register_callback(CallbackCookie::new(0, true), system_tx);
    harness
        .handle
        .register_callback(CallbackCookie::new(2000, false), other_tx);
    harness.fence().await;

    let _listener = harness.handle.start_tethering(wifi_request(1000, "ap"));
    harness.fence().await;
    harness.send_ibus(IbusMsg::WifiApState(WifiApState::Enabled {
        ifname: "wlan0".to_owned(),
    }));
    harness.fence().await;
    harness
        .server_state("wlan0", IpServingState::Tethered, TetherError::NoError)
        .await;

    let tethered_config = |events: Vec<TetheringEvent>| {
        events
            .into_iter()
            .rev()
            .find_map(|event| match event {
                TetheringEvent::States(states)
                    if !states.tethered.is_empty() =>
                {
                    Some(states.tethered[0].soft_ap_config.clone())
                }
                _ => None,
            })
            .expect("no tethered states event")
    };

    assert!(tethered_config(drain(&mut owner_rx)).is_some());
    assert!(tethered_config(drain(&mut system_rx)).is_some());
    assert!(tethered_config(drain(&mut other_rx)).is_none());
}

// Input:
//  * A DHCP lease change on a serving downstream
// Output:
//  * Privileged observers receive the client list; others an empty one
#[tokio::test]
async fn clients_privileged_only() {
    let harness = Harness::start();

    let (system_tx, mut system_rx) = mpsc::unbounded_channel();
    let (other_tx, mut other_rx) = mpsc::unbounded_channel();
    harness
        .handle
        .register_callback(CallbackCookie::new(0, true), system_tx);
    harness
        .handle
        .register_callback(CallbackCookie::new(2000, false), other_tx);

    let _listener = harness.handle.start_tethering(wifi_request(1000, "ap"));
    harness.fence().await;
    harness.send_ibus(IbusMsg::WifiApState(WifiApState::Enabled {
        ifname: "wlan0".to_owned(),
    }));
    harness.fence().await;
    harness
        .server_state("wlan0", IpServingState::Tethered, TetherError::NoError)
        .await;

    let (id, event_tx) = {
        let servers = &harness.factory.lock().unwrap().servers;
        let server = servers.last().unwrap();
        (server.id, server.event_tx.clone())
    };
    event_tx
        .send(IpServerEventMsg {
            id,
            ifname: "wlan0".to_owned(),
            event: IpServerEvent::DhcpLeasesChanged {
                clients: vec![TetheredClient {
                    mac_addr: MacAddr::from([0, 1, 2, 3, 4, 5]),
                    addresses: vec!["192.168.42.17".parse().unwrap()],
                    tethering_type: TetheringType::Wifi,
                }],
            },
        })
        .unwrap();
    harness.fence().await;

    let clients_of = |events: Vec<TetheringEvent>| {
        events
            .into_iter()
            .rev()
            .find_map(|event| match event {
                TetheringEvent::Clients(clients) => Some(clients),
                _ => None,
            })
            .expect("no clients event")
    };

    assert_eq!(clients_of(drain(&mut system_rx)).len(), 1);
    assert!(clients_of(drain(&mut other_rx)).is_empty());
}

// Input:
//  * An observer unregisters, then states change
// Output:
//  * No further events are delivered to it
#[tokio::test]
async fn unregister_stops_delivery() {
    let harness = Harness::start();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = harness
        .handle
        .register_callback(CallbackCookie::new(1000, false), tx);
    harness.fence().await;
    drain(&mut rx);

    harness.handle.unregister_callback(id);
    harness.fence().await;

    let _listener = harness.handle.start_tethering(wifi_request(1000, "ap"));
    harness.fence().await;
    harness.send_ibus(IbusMsg::WifiApState(WifiApState::Enabled {
        ifname: "wlan0".to_owned(),
    }));
    harness.fence().await;

    assert!(drain(&mut rx).is_empty());
}
