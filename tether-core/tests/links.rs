//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod common;

use common::{Harness, explicit_request, wifi_request};
use tether_utils::ibus::{
    BluetoothCmd, IbusMsg, PanEvent, WifiApState, WifiCmd,
};
use tether_utils::ipserver::{IpServerEvent, IpServerEventMsg, IpServerMsg};
use tether_utils::tether::{
    ConnectivityScope, IpServingState, TetherError, TetheringType,
};

// Input:
//  * startTethering(BLUETOOTH) with no PAN binding yet
//  * PAN service connects, then the PAN interface appears
// Output:
//  * The bind is deferred and the listener parked until the service
//    connects; serving starts on the PAN interface
#[tokio::test]
async fn bluetooth_deferred_bind() {
    let mut harness = Harness::start();

    let mut listener = harness
        .handle
        .start_tethering(explicit_request(TetheringType::Bluetooth, 1000));
    harness.fence().await;

    // Bind requested, result still pending.
    assert!(matches!(
        harness.links.bluetooth.try_recv().unwrap(),
        BluetoothCmd::BindPan
    ));
    assert!(listener.try_recv().is_err());

    // The profile connects: tethering is enabled on the proxy and the
    // parked listener resolves.
    harness.send_ibus(IbusMsg::BluetoothPan(PanEvent::ServiceConnected));
    harness.fence().await;
    assert_eq!(listener.await.unwrap(), TetherError::NoError);
    assert!(matches!(
        harness.links.bluetooth.try_recv().unwrap(),
        BluetoothCmd::SetPanTethering(true)
    ));

    // The PAN interface shows up and starts serving.
    harness.send_ibus(IbusMsg::BluetoothPan(PanEvent::InterfaceAvailable {
        ifname: "bt-pan".to_owned(),
    }));
    harness.fence().await;
    let cmds = harness.server_cmds("bt-pan");
    assert!(matches!(cmds[0], IpServerMsg::Start));
    assert!(matches!(&cmds[1], IpServerMsg::Enable(req)
        if req.tethering_type == TetheringType::Bluetooth));
}

// Input:
//  * A start waiting on the PAN bind, a stop, then a second start while
//    the bind is still in flight
// Output:
//  * The parked listener fails with SERVICE_UNAVAIL; so does the second
//    start (one queued listener only); the late connect enables nothing
#[tokio::test]
async fn bluetooth_stop_while_binding() {
    let mut harness = Harness::start();

    let first = harness
        .handle
        .start_tethering(explicit_request(TetheringType::Bluetooth, 1000));
    harness.fence().await;

    harness.handle.stop_tethering(TetheringType::Bluetooth);
    harness.fence().await;
    assert_eq!(first.await.unwrap(), TetherError::ServiceUnavail);

    let second = harness
        .handle
        .start_tethering(explicit_request(TetheringType::Bluetooth, 1000));
    harness.fence().await;
    assert_eq!(second.await.unwrap(), TetherError::ServiceUnavail);

    // The bind completes with nothing left wanting it: the proxy is not
    // asked to tether.
    harness.links.bluetooth.try_recv().ok();
    harness.send_ibus(IbusMsg::BluetoothPan(PanEvent::ServiceConnected));
    harness.fence().await;
    assert!(harness.links.bluetooth.try_recv().is_err());
}

// Input:
//  * PAN service disconnects while a downstream is serving
// Output:
//  * The downstream is torn down
#[tokio::test]
async fn bluetooth_service_loss() {
    let harness = Harness::start();

    let _listener = harness
        .handle
        .start_tethering(explicit_request(TetheringType::Bluetooth, 1000));
    harness.fence().await;
    harness.send_ibus(IbusMsg::BluetoothPan(PanEvent::ServiceConnected));
    harness.send_ibus(IbusMsg::BluetoothPan(PanEvent::InterfaceAvailable {
        ifname: "bt-pan".to_owned(),
    }));
    harness.fence().await;
    harness
        .server_state("bt-pan", IpServingState::Tethered, TetherError::NoError)
        .await;

    harness.send_ibus(IbusMsg::BluetoothPan(PanEvent::ServiceDisconnected));
    harness.fence().await;

    let snapshot = harness.handle.dump().await.unwrap();
    assert!(snapshot.downstreams.is_empty());
    assert_eq!(snapshot.state, "initial");
}

// Input:
//  * Wi-Fi serving, then stop, DISABLED, and a fresh start/ENABLED cycle
// Output:
//  * The second start succeeds on a fresh IP server
#[tokio::test]
async fn wifi_rapid_restart() {
    let mut harness = Harness::start();

    let listener = harness.handle.start_tethering(wifi_request(1000, "ap"));
    harness.fence().await;
    harness.send_ibus(IbusMsg::WifiApState(WifiApState::Enabled {
        ifname: "wlan0".to_owned(),
    }));
    harness.fence().await;
    assert_eq!(listener.await.unwrap(), TetherError::NoError);
    harness
        .server_state("wlan0", IpServingState::Tethered, TetherError::NoError)
        .await;
    let first_id = harness.server_id("wlan0");

    // Stop: the soft AP is asked to shut down and later reports DISABLED.
    harness.handle.stop_tethering(TetheringType::Wifi);
    harness.fence().await;
    let mut stop_seen = false;
    while let Ok(cmd) = harness.links.wifi.try_recv() {
        if matches!(cmd, WifiCmd::StopSoftAp) {
            stop_seen = true;
        }
    }
    assert!(stop_seen);
    harness.send_ibus(IbusMsg::WifiApState(WifiApState::Disabled {
        ifname: Some("wlan0".to_owned()),
    }));
    harness.fence().await;

    let snapshot = harness.handle.dump().await.unwrap();
    assert_eq!(snapshot.state, "initial");
    assert!(snapshot.downstreams.is_empty());

    // Start again: a new IP server takes over the interface.
    let listener = harness.handle.start_tethering(wifi_request(1000, "ap"));
    harness.fence().await;
    harness.send_ibus(IbusMsg::WifiApState(WifiApState::Enabled {
        ifname: "wlan0".to_owned(),
    }));
    harness.fence().await;
    assert_eq!(listener.await.unwrap(), TetherError::NoError);
    assert_eq!(harness.server_count(), 2);
    assert_ne!(harness.server_id("wlan0"), first_id);
}

// Input:
//  * A state callback carrying the identifier of a replaced IP server
// Output:
//  * The stale message is dropped; the fresh server's state is untouched
#[tokio::test]
async fn stale_ipserver_event_ignored() {
    let harness = Harness::start();

    let _listener = harness.handle.start_tethering(wifi_request(1000, "ap"));
    harness.fence().await;
    harness.send_ibus(IbusMsg::WifiApState(WifiApState::Enabled {
        ifname: "wlan0".to_owned(),
    }));
    harness.fence().await;
    harness
        .server_state("wlan0", IpServingState::Tethered, TetherError::NoError)
        .await;
    let fresh_id = harness.server_id("wlan0");

    // A message from a server that never owned the entry.
    let event_tx = {
        let servers = &harness.factory.lock().unwrap().servers;
        servers.last().unwrap().event_tx.clone()
    };
    event_tx
        .send(IpServerEventMsg {
            id: fresh_id + 100,
            ifname: "wlan0".to_owned(),
            event: IpServerEvent::StateChanged {
                state: IpServingState::Unavailable,
                last_error: TetherError::InternalError,
            },
        })
        .unwrap();
    harness.fence().await;

    let snapshot = harness.handle.dump().await.unwrap();
    assert_eq!(snapshot.state, "tether-mode-alive");
    assert_eq!(snapshot.downstreams.len(), 1);
    assert_eq!(snapshot.downstreams[0].state, IpServingState::Tethered);
}

// Input:
//  * A P2P group forms with this device as owner, then moves interfaces
// Output:
//  * An implicit local-only request serves the group interface; the old
//    interface is torn down when the group moves
#[tokio::test]
async fn p2p_group_lifecycle() {
    let harness = Harness::start();

    harness.send_ibus(IbusMsg::WifiP2pGroup {
        group_owner: true,
        ifname: Some("p2p-p2p0-0".to_owned()),
    });
    harness.fence().await;

    let cmds = harness.server_cmds("p2p-p2p0-0");
    assert!(matches!(&cmds[1], IpServerMsg::Enable(req)
        if req.tethering_type == TetheringType::WifiP2p
        && req.connectivity_scope == ConnectivityScope::Local));
    harness
        .server_state(
            "p2p-p2p0-0",
            IpServingState::LocalOnly,
            TetherError::NoError,
        )
        .await;

    // The group moves to a new interface.
    harness.send_ibus(IbusMsg::WifiP2pGroup {
        group_owner: true,
        ifname: Some("p2p-p2p0-1".to_owned()),
    });
    harness.fence().await;

    let snapshot = harness.handle.dump().await.unwrap();
    assert_eq!(snapshot.downstreams.len(), 1);
    assert_eq!(snapshot.downstreams[0].ifname, "p2p-p2p0-1");

    // Group lost: everything unwinds.
    harness.send_ibus(IbusMsg::WifiP2pGroup {
        group_owner: false,
        ifname: None,
    });
    harness.fence().await;
    let snapshot = harness.handle.dump().await.unwrap();
    assert!(snapshot.downstreams.is_empty());
}
