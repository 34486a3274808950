//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

// Not every test crate exercises every helper.
#![allow(dead_code)]

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use tether_core::api::TetheringHandle;
use tether_core::config::TetheringConfig;
use tether_core::master;
use tether_core::offload::NoopOffload;
use tether_utils::ibus::{self, IbusMsg, IbusSender, LinkChannelsRx};
use tether_utils::ipserver::{
    IpServerEvent, IpServerEventMsg, IpServerEventSender, IpServerFactory,
    IpServerHandle, IpServerId, IpServerMsg,
};
use tether_utils::netd::{NetdClient, NetdError};
use tether_utils::tether::{
    ApBand, ConnectivityScope, IpServingState, RequestType, SoftApConfig,
    TetherError, TetheringRequest, TetheringType,
};
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;

// Recorded state of the mock network daemon.
#[derive(Debug, Default)]
pub struct NetdState {
    pub calls: Vec<String>,
    pub forwarding: bool,
    pub tether_started: bool,
    pub dns_servers: Vec<IpAddr>,
    pub interfaces: Vec<String>,
    // Verbs that fail on their next invocation.
    pub fail: HashSet<&'static str>,
}

pub struct MockNetd(Arc<Mutex<NetdState>>);

// A created IP server, visible to the test.
pub struct MockServer {
    pub id: IpServerId,
    pub ifname: String,
    pub tethering_type: TetheringType,
    pub cmds: UnboundedReceiver<IpServerMsg>,
    pub event_tx: IpServerEventSender,
}

#[derive(Default)]
pub struct FactoryState {
    pub servers: Vec<MockServer>,
}

pub struct MockFactory(Arc<Mutex<FactoryState>>);

// Full control-plane test harness: mock netd, mock IP server factory, and
// captured link-layer command channels.
pub struct Harness {
    pub handle: TetheringHandle,
    pub ibus_tx: IbusSender,
    pub links: LinkChannelsRx,
    pub netd: Arc<Mutex<NetdState>>,
    pub factory: Arc<Mutex<FactoryState>>,
}

// ===== impl MockNetd =====

impl MockNetd {
    fn fail_check(
        state: &mut NetdState,
        verb: &'static str,
    ) -> Result<(), NetdError> {
        state.calls.push(verb.to_owned());
        if state.fail.remove(verb) {
            return Err(NetdError::ServiceSpecific {
                code: 1,
                message: format!("{verb} failed"),
            });
        }
        Ok(())
    }
}

impl NetdClient for MockNetd {
    fn ip_forwarding_enable(&mut self, _tag: &str) -> Result<(), NetdError> {
        let mut state = self.0.lock().unwrap();
        Self::fail_check(&mut state, "ipForwardingEnable")?;
        state.forwarding = true;
        Ok(())
    }

    fn ip_forwarding_disable(&mut self, _tag: &str) -> Result<(), NetdError> {
        let mut state = self.0.lock().unwrap();
        Self::fail_check(&mut state, "ipForwardingDisable")?;
        state.forwarding = false;
        Ok(())
    }

    fn tether_start(
        &mut self,
        _using_legacy_dns_proxy: bool,
        _dhcp_ranges: &[String],
    ) -> Result<(), NetdError> {
        let mut state = self.0.lock().unwrap();
        Self::fail_check(&mut state, "tetherStart")?;
        state.tether_started = true;
        Ok(())
    }

    fn tether_stop(&mut self) -> Result<(), NetdError> {
        let mut state = self.0.lock().unwrap();
        Self::fail_check(&mut state, "tetherStop")?;
        state.tether_started = false;
        Ok(())
    }

    fn tether_dns_set(
        &mut self,
        _net_id: u32,
        dns_servers: &[IpAddr],
    ) -> Result<(), NetdError> {
        let mut state = self.0.lock().unwrap();
        Self::fail_check(&mut state, "tetherDnsSet")?;
        state.dns_servers = dns_servers.to_vec();
        Ok(())
    }

    fn interface_get_list(&mut self) -> Result<Vec<String>, NetdError> {
        let mut state = self.0.lock().unwrap();
        Self::fail_check(&mut state, "interfaceGetList")?;
        Ok(state.interfaces.clone())
    }
}

// ===== impl MockFactory =====

impl IpServerFactory for MockFactory {
    fn create(
        &mut self,
        id: IpServerId,
        ifname: &str,
        tethering_type: TetheringType,
        _is_ncm: bool,
        event_tx: IpServerEventSender,
    ) -> IpServerHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        self.0.lock().unwrap().servers.push(MockServer {
            id,
            ifname: ifname.to_owned(),
            tethering_type,
            cmds: cmd_rx,
            event_tx,
        });
        IpServerHandle::new(id, ifname.to_owned(), tethering_type, cmd_tx)
    }
}

// ===== impl Harness =====

impl Harness {
    pub fn start() -> Harness {
        Harness::start_with_config(TetheringConfig::default())
    }

    pub fn start_with_config(config: TetheringConfig) -> Harness {
        let netd = Arc::new(Mutex::new(NetdState::default()));
        let factory = Arc::new(Mutex::new(FactoryState::default()));

        let (ibus_tx, ibus_rx) = mpsc::unbounded_channel();
        let (links_tx, links_rx) = ibus::link_channels();

        let handle = master::start(
            config,
            Box::new(MockNetd(netd.clone())),
            Box::new(MockFactory(factory.clone())),
            Box::new(NoopOffload::default()),
            links_tx,
            ibus_rx,
        );

        Harness {
            handle,
            ibus_tx,
            links: links_rx,
            netd,
            factory,
        }
    }

    // Waits until every previously posted event has been processed. The
    // dump round-trip doubles as a FIFO fence through the event loop.
    pub async fn fence(&self) {
        self.handle.dump().await.expect("master loop is gone");
    }

    pub fn send_ibus(&self, msg: IbusMsg) {
        self.ibus_tx.send(msg).expect("master loop is gone");
    }

    // Returns the identifier of the IP server driving `ifname`.
    pub fn server_id(&self, ifname: &str) -> IpServerId {
        self.factory
            .lock()
            .unwrap()
            .servers
            .iter()
            .rev()
            .find(|server| server.ifname == ifname)
            .map(|server| server.id)
            .expect("no ip server for interface")
    }

    pub fn server_count(&self) -> usize {
        self.factory.lock().unwrap().servers.len()
    }

    // Drains the commands sent to the newest IP server of `ifname`.
    pub fn server_cmds(&self, ifname: &str) -> Vec<IpServerMsg> {
        let mut state = self.factory.lock().unwrap();
        let server = state
            .servers
            .iter_mut()
            .rev()
            .find(|server| server.ifname == ifname)
            .expect("no ip server for interface");
        let mut cmds = Vec::new();
        while let Ok(cmd) = server.cmds.try_recv() {
            cmds.push(cmd);
        }
        cmds
    }

    // Emits a state-change callback from the IP server of `ifname`.
    pub async fn server_state(
        &self,
        ifname: &str,
        state: IpServingState,
        last_error: TetherError,
    ) {
        let (id, event_tx) = {
            let servers = &self.factory.lock().unwrap().servers;
            let server = servers
                .iter()
                .rev()
                .find(|server| server.ifname == ifname)
                .expect("no ip server for interface");
            (server.id, server.event_tx.clone())
        };
        event_tx
            .send(IpServerEventMsg {
                id,
                ifname: ifname.to_owned(),
                event: IpServerEvent::StateChanged { state, last_error },
            })
            .expect("master loop is gone");
        self.fence().await;
    }

    pub fn netd_calls(&self) -> Vec<String> {
        self.netd.lock().unwrap().calls.clone()
    }
}

// ===== global functions =====

pub fn wifi_request(uid: u32, ssid: &str) -> TetheringRequest {
    TetheringRequest {
        tethering_type: TetheringType::Wifi,
        connectivity_scope: ConnectivityScope::Global,
        soft_ap_config: Some(SoftApConfig {
            ssid: ssid.to_owned(),
            passphrase: Some("hunter22".to_owned()),
            band: ApBand::Any,
            hidden: false,
        }),
        interface_name: None,
        exempt_from_entitlement_check: false,
        show_entitlement_ui: false,
        request_type: RequestType::Explicit,
        uid: Some(uid),
        package_name: Some("com.example.hotspot".to_owned()),
    }
}

pub fn explicit_request(
    tethering_type: TetheringType,
    uid: u32,
) -> TetheringRequest {
    TetheringRequest {
        tethering_type,
        connectivity_scope: ConnectivityScope::Global,
        soft_ap_config: None,
        interface_name: None,
        exempt_from_entitlement_check: false,
        show_entitlement_ui: false,
        request_type: RequestType::Explicit,
        uid: Some(uid),
        package_name: Some("com.example.tether".to_owned()),
    }
}
