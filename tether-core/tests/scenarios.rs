//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod common;

use common::{Harness, explicit_request, wifi_request};
use tether_utils::ibus::{
    IbusMsg, IfaceEvent, UpstreamEvent, UsbCmd, UsbFunction, UsbState,
    WifiApState,
};
use tether_utils::ipserver::IpServerMsg;
use tether_utils::tether::{
    IpServingState, NetworkId, RequestType, TetherError, TetheringType,
    UpstreamNetwork,
};

// Input:
//  * API: startTethering(USB), then the USB gadget reports "configured"
//  * IP server: AVAILABLE, then TETHERED
// Output:
//  * Listener resolves NO_ERROR synchronously
//  * Kernel: forwarding enabled, then tethering started (in that order)
//  * On USB disconnect everything unwinds back to Initial
#[tokio::test]
async fn usb_end_to_end() {
    let mut harness = Harness::start();
    harness.netd.lock().unwrap().interfaces =
        vec!["lo".to_owned(), "usb0".to_owned()];

    // Start USB tethering; success is reported synchronously.
    let listener =
        harness.handle.start_tethering(explicit_request(TetheringType::Usb, 1000));
    harness.fence().await;
    assert_eq!(listener.await.unwrap(), TetherError::NoError);
    assert!(matches!(
        harness.links.usb.try_recv().unwrap(),
        UsbCmd::SetFunction(Some(UsbFunction::Rndis))
    ));

    // The gadget comes up; the matching interface gets an IP server.
    harness.send_ibus(IbusMsg::UsbState(UsbState::Configured {
        function: UsbFunction::Rndis,
    }));
    harness.fence().await;
    let cmds = harness.server_cmds("usb0");
    assert!(matches!(cmds[0], IpServerMsg::Start));
    assert!(matches!(&cmds[1], IpServerMsg::Enable(req)
        if req.tethering_type == TetheringType::Usb
        && req.request_type == RequestType::Explicit));

    // The pending request was promoted.
    let snapshot = harness.handle.dump().await.unwrap();
    assert!(snapshot.pending.is_empty());
    assert_eq!(snapshot.serving.len(), 1);

    // Serving brings the main state machine up.
    harness
        .server_state("usb0", IpServingState::Available, TetherError::NoError)
        .await;
    harness
        .server_state("usb0", IpServingState::Tethered, TetherError::NoError)
        .await;

    let snapshot = harness.handle.dump().await.unwrap();
    assert_eq!(snapshot.state, "tether-mode-alive");
    {
        let netd = harness.netd.lock().unwrap();
        assert!(netd.forwarding);
        assert!(netd.tether_started);
        let enable = netd
            .calls
            .iter()
            .position(|call| call == "ipForwardingEnable")
            .unwrap();
        let start = netd
            .calls
            .iter()
            .position(|call| call == "tetherStart")
            .unwrap();
        assert!(enable < start);
    }

    // Cable pulled: the downstream unwinds and forwarding goes away.
    harness.send_ibus(IbusMsg::UsbState(UsbState::Disconnected));
    harness.fence().await;

    let snapshot = harness.handle.dump().await.unwrap();
    assert_eq!(snapshot.state, "initial");
    assert!(snapshot.serving.is_empty());
    assert!(snapshot.downstreams.is_empty());
    {
        let netd = harness.netd.lock().unwrap();
        assert!(!netd.forwarding);
        assert!(!netd.tether_started);
    }
}

// Input:
//  * USB gadget reports "configured" with no pending request
// Output:
//  * IP serving is enabled with a synthesized placeholder request
#[tokio::test]
async fn usb_placeholder_serving() {
    let harness = Harness::start();
    harness.netd.lock().unwrap().interfaces = vec!["usb0".to_owned()];

    harness.send_ibus(IbusMsg::UsbState(UsbState::Configured {
        function: UsbFunction::Rndis,
    }));
    harness.fence().await;

    let cmds = harness.server_cmds("usb0");
    assert!(matches!(&cmds[1], IpServerMsg::Enable(req)
        if req.request_type == RequestType::Placeholder));
}

// Input:
//  * Two interchangeable Wi-Fi requests (same fields, different uid), the
//    second arriving while the first is still pending
// Output:
//  * The first start is superseded; the second wins and serves once the
//    soft AP reports ENABLED
#[tokio::test]
async fn wifi_duplicate_restart() {
    let mut harness = Harness::start();

    let first = harness.handle.start_tethering(wifi_request(1000, "ap"));
    harness.fence().await;
    let second = harness.handle.start_tethering(wifi_request(2000, "ap"));
    harness.fence().await;

    // The superseded start is failed; the new one is parked.
    assert_eq!(first.await.unwrap(), TetherError::InternalError);

    // The pending list holds exactly the second request.
    let snapshot = harness.handle.dump().await.unwrap();
    assert_eq!(snapshot.pending.len(), 1);
    assert_eq!(snapshot.pending[0].uid, Some(2000));

    // Soft AP comes up; the new request serves.
    harness.send_ibus(IbusMsg::WifiApState(WifiApState::Enabled {
        ifname: "wlan0".to_owned(),
    }));
    harness.fence().await;
    assert_eq!(second.await.unwrap(), TetherError::NoError);

    let snapshot = harness.handle.dump().await.unwrap();
    assert!(snapshot.pending.is_empty());
    assert_eq!(snapshot.serving.len(), 1);
    assert_eq!(snapshot.serving[0].request.uid, Some(2000));
    // Two soft-AP start commands went out (initial + restart).
    let mut starts = 0;
    while let Ok(cmd) = harness.links.wifi.try_recv() {
        if matches!(cmd, tether_utils::ibus::WifiCmd::StartSoftAp { .. }) {
            starts += 1;
        }
    }
    assert_eq!(starts, 2);
}

// Input:
//  * Two conflicting Wi-Fi requests (different soft-AP config)
// Output:
//  * The second is rejected with DUPLICATE_REQUEST; the first stays pending
#[tokio::test]
async fn wifi_duplicate_error() {
    let harness = Harness::start();

    let _first = harness.handle.start_tethering(wifi_request(1000, "ap-a"));
    harness.fence().await;
    let second = harness.handle.start_tethering(wifi_request(1000, "ap-b"));
    harness.fence().await;

    assert_eq!(second.await.unwrap(), TetherError::DuplicateRequest);

    let snapshot = harness.handle.dump().await.unwrap();
    assert_eq!(snapshot.pending.len(), 1);
    assert_eq!(
        snapshot.pending[0].soft_ap_config.as_ref().unwrap().ssid,
        "ap-a"
    );
}

// Input:
//  * A TETHERED downstream, then the selector advertises an upstream
// Output:
//  * DNS forwarders are programmed (config defaults, the upstream has none)
//  * Every serving IP server sees exactly one connection-changed push
//  * Re-advertising the identical upstream is a no-op
#[tokio::test]
async fn upstream_fan_out() {
    let mut harness = Harness::start();
    harness.netd.lock().unwrap().interfaces = vec!["usb0".to_owned()];

    let _listener =
        harness.handle.start_tethering(explicit_request(TetheringType::Usb, 1000));
    harness.fence().await;
    harness.send_ibus(IbusMsg::UsbState(UsbState::Configured {
        function: UsbFunction::Rndis,
    }));
    harness.fence().await;
    harness
        .server_state("usb0", IpServingState::Tethered, TetherError::NoError)
        .await;
    harness.server_cmds("usb0");

    // Entering serving requested upstream observation and a cellular hint.
    let mut observation = false;
    let mut cellular = false;
    while let Ok(cmd) = harness.links.upstream.try_recv() {
        match cmd {
            tether_utils::ibus::UpstreamCmd::StartObservation => {
                observation = true
            }
            tether_utils::ibus::UpstreamCmd::SetCellularPreference(true) => {
                cellular = true
            }
            _ => (),
        }
    }
    assert!(observation);
    assert!(cellular);
    // The cellular attempt waits for the selector; no retry is armed.
    let snapshot = harness.handle.dump().await.unwrap();
    assert!(!snapshot.upstream_retry_pending);

    // The selector advertises an upstream without DNS servers.
    let upstream = UpstreamNetwork {
        network: NetworkId(100),
        ifname: "rmnet0".to_owned(),
        stacked: vec!["v4-rmnet0".to_owned()],
        dns_servers: Vec::new(),
    };
    harness.send_ibus(IbusMsg::Upstream(UpstreamEvent::Changed(Some(
        upstream.clone(),
    ))));
    harness.fence().await;

    {
        let netd = harness.netd.lock().unwrap();
        // Config defaults kick in when the upstream advertises no DNS.
        assert_eq!(netd.dns_servers.len(), 2);
    }
    let pushes = harness
        .server_cmds("usb0")
        .into_iter()
        .filter(|cmd| {
            matches!(cmd, IpServerMsg::TetherConnectionChanged {
                upstream_ifaces: Some(ifaces),
            } if ifaces == &["rmnet0".to_owned(), "v4-rmnet0".to_owned()])
        })
        .count();
    assert_eq!(pushes, 1);

    // Identical advertisement: no new DNS programming, no new push.
    let dns_calls_before = harness
        .netd_calls()
        .iter()
        .filter(|call| *call == "tetherDnsSet")
        .count();
    harness.send_ibus(IbusMsg::Upstream(UpstreamEvent::Changed(Some(
        upstream,
    ))));
    harness.fence().await;
    let dns_calls_after = harness
        .netd_calls()
        .iter()
        .filter(|call| *call == "tetherDnsSet")
        .count();
    assert_eq!(dns_calls_before, dns_calls_after);
    assert!(harness.server_cmds("usb0").is_empty());
}

// Input:
//  * Ethernet and USB downstreams serving, then DISALLOW_CONFIG_TETHERING
// Output:
//  * Supported-types bitmap reads 0 from any thread
//  * Both types are stopped; once the link layers confirm, the machine is
//    back in Initial with forwarding disabled
#[tokio::test]
async fn user_restriction_stops_everything() {
    let mut harness = Harness::start();
    harness.netd.lock().unwrap().interfaces = vec!["usb0".to_owned()];

    // Ethernet downstream.
    let eth_listener = harness
        .handle
        .start_tethering(explicit_request(TetheringType::Ethernet, 1000));
    harness.fence().await;
    assert_eq!(eth_listener.await.unwrap(), TetherError::NoError);
    harness.send_ibus(IbusMsg::DownstreamIface {
        tethering_type: TetheringType::Ethernet,
        event: IfaceEvent::Available {
            ifname: "eth1".to_owned(),
        },
    });
    harness.fence().await;
    harness
        .server_state("eth1", IpServingState::Tethered, TetherError::NoError)
        .await;

    // USB downstream.
    let _usb_listener = harness
        .handle
        .start_tethering(explicit_request(TetheringType::Usb, 1000));
    harness.fence().await;
    harness.send_ibus(IbusMsg::UsbState(UsbState::Configured {
        function: UsbFunction::Rndis,
    }));
    harness.fence().await;
    harness
        .server_state("usb0", IpServingState::Tethered, TetherError::NoError)
        .await;

    assert!(!harness.handle.supported_types().is_empty());

    // The restriction lands.
    harness.send_ibus(IbusMsg::UserRestriction {
        disallow_tethering: true,
    });
    harness.fence().await;

    assert!(harness.handle.supported_types().is_empty());
    let snapshot = harness.handle.dump().await.unwrap();
    assert!(snapshot.serving.is_empty());

    // The link layers confirm the teardown.
    harness.send_ibus(IbusMsg::UsbState(UsbState::Disconnected));
    harness.send_ibus(IbusMsg::DownstreamIface {
        tethering_type: TetheringType::Ethernet,
        event: IfaceEvent::Unavailable {
            ifname: "eth1".to_owned(),
        },
    });
    harness.fence().await;

    let snapshot = harness.handle.dump().await.unwrap();
    assert_eq!(snapshot.state, "initial");
    assert!(!harness.netd.lock().unwrap().forwarding);
}

// Input:
//  * stopTethering on a type with nothing pending or serving
// Output:
//  * No-op; the state machines and the kernel are untouched
#[tokio::test]
async fn stop_idle_type_is_noop() {
    let harness = Harness::start();

    harness.handle.stop_tethering(TetheringType::Usb);
    harness.fence().await;

    let snapshot = harness.handle.dump().await.unwrap();
    assert_eq!(snapshot.state, "initial");
    assert!(snapshot.pending.is_empty());
    assert!(harness.netd_calls().is_empty());
}

// Input:
//  * A serving Wi-Fi request, stopped via a fuzzy-matching stop request
// Output:
//  * NO_ERROR and the soft AP is asked to stop; a non-matching request
//    gets UNKNOWN_REQUEST
#[tokio::test]
async fn stop_tethering_request_fuzzy() {
    let mut harness = Harness::start();

    let listener = harness.handle.start_tethering(wifi_request(1000, "ap"));
    harness.fence().await;
    harness.send_ibus(IbusMsg::WifiApState(WifiApState::Enabled {
        ifname: "wlan0".to_owned(),
    }));
    harness.fence().await;
    assert_eq!(listener.await.unwrap(), TetherError::NoError);

    // Wrong uid without privilege: no match.
    let caller = tether_core::api::CallerIdentity::new(
        2000,
        "com.example.other".to_owned(),
        false,
    );
    let result = harness
        .handle
        .stop_tethering_request(wifi_request(2000, "ap"), caller);
    harness.fence().await;
    assert_eq!(result.await.unwrap(), TetherError::UnknownRequest);

    // Matching uid: stops the type.
    let caller = tether_core::api::CallerIdentity::new(
        1000,
        "com.example.hotspot".to_owned(),
        false,
    );
    let result = harness
        .handle
        .stop_tethering_request(wifi_request(1000, "ap"), caller);
    harness.fence().await;
    assert_eq!(result.await.unwrap(), TetherError::NoError);

    let mut stop_seen = false;
    while let Ok(cmd) = harness.links.wifi.try_recv() {
        if matches!(cmd, tether_utils::ibus::WifiCmd::StopSoftAp) {
            stop_seen = true;
        }
    }
    assert!(stop_seen);

    let snapshot = harness.handle.dump().await.unwrap();
    assert!(snapshot.serving.is_empty());
}

// Input:
//  * Kernel DNS programming fails while selecting an upstream
// Output:
//  * The machine enters the DNS error state, every IP server is notified,
//    and best-effort cleanup runs; CLEAR_ERROR recovers via INTERNAL_ERROR
#[tokio::test]
async fn dns_failure_enters_error_state() {
    let harness = Harness::start();
    harness.netd.lock().unwrap().interfaces = vec!["usb0".to_owned()];

    let _listener =
        harness.handle.start_tethering(explicit_request(TetheringType::Usb, 1000));
    harness.fence().await;
    harness.send_ibus(IbusMsg::UsbState(UsbState::Configured {
        function: UsbFunction::Rndis,
    }));
    harness.fence().await;
    harness
        .server_state("usb0", IpServingState::Tethered, TetherError::NoError)
        .await;
    harness.server_cmds("usb0");

    harness.netd.lock().unwrap().fail.insert("tetherDnsSet");
    harness.send_ibus(IbusMsg::Upstream(UpstreamEvent::Changed(Some(
        UpstreamNetwork {
            network: NetworkId(100),
            ifname: "rmnet0".to_owned(),
            stacked: Vec::new(),
            dns_servers: Vec::new(),
        },
    ))));
    harness.fence().await;

    let snapshot = harness.handle.dump().await.unwrap();
    assert_eq!(snapshot.state, "set-dns-forwarders-error");
    let cmds = harness.server_cmds("usb0");
    assert!(cmds
        .iter()
        .any(|cmd| matches!(cmd, IpServerMsg::SetDnsForwardersError)));
    // Best-effort cleanup disabled forwarding.
    assert!(!harness.netd.lock().unwrap().forwarding);

    // The IP server reports the internal error; the machine clears.
    harness
        .server_state(
            "usb0",
            IpServingState::Available,
            TetherError::InternalError,
        )
        .await;
    let snapshot = harness.handle.dump().await.unwrap();
    assert_eq!(snapshot.state, "initial");
    assert!(snapshot.serving.is_empty());
}
