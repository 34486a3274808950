//
// Copyright (c) The Tether Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;
use std::process::{Child, Command, Stdio};

use sysctl::Sysctl;
use tether_utils::netd::{NetdClient, NetdError};
use tracing::{debug, warn};

use crate::config;

const IPV4_FORWARDING_CTL: &str = "net.ipv4.ip_forward";
const IPV6_FORWARDING_CTL: &str = "net.ipv6.conf.all.forwarding";

// Linux implementation of the network daemon interface.
//
// Forwarding toggles go through sysctl; DHCP and DNS relaying for the
// downstreams are provided by a managed dnsmasq child process.
pub struct LinuxNetd {
    dnsmasq_path: String,
    dnsmasq: Option<Child>,
    dhcp_ranges: Vec<String>,
    dns_servers: Vec<IpAddr>,
}

// ===== impl LinuxNetd =====

impl LinuxNetd {
    pub fn new(config: &config::Netd) -> LinuxNetd {
        LinuxNetd {
            dnsmasq_path: config.dnsmasq_path.clone(),
            dnsmasq: None,
            dhcp_ranges: Vec::new(),
            dns_servers: Vec::new(),
        }
    }

    fn sysctl_write(name: &str, value: &str) -> Result<(), NetdError> {
        let ctl = sysctl::Ctl::new(name).map_err(|error| {
            NetdError::ServiceSpecific {
                code: libc::ENOENT,
                message: format!("{name}: {error}"),
            }
        })?;
        ctl.set_value_string(value).map_err(|error| {
            NetdError::ServiceSpecific {
                code: libc::EACCES,
                message: format!("{name}: {error}"),
            }
        })?;
        Ok(())
    }

    fn spawn_dnsmasq(&mut self) -> Result<(), NetdError> {
        let mut command = Command::new(&self.dnsmasq_path);
        command
            .arg("--keep-in-foreground")
            .arg("--no-resolv")
            .arg("--no-hosts")
            .arg("--bind-dynamic")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        for range in self.dhcp_ranges.chunks(2) {
            if let [first, last] = range {
                command.arg(format!("--dhcp-range={first},{last}"));
            }
        }
        for server in &self.dns_servers {
            command.arg(format!("--server={server}"));
        }

        let child = command.spawn()?;
        debug!(pid = child.id(), "dnsmasq started");
        self.dnsmasq = Some(child);
        Ok(())
    }

    fn kill_dnsmasq(&mut self) {
        if let Some(mut child) = self.dnsmasq.take() {
            if let Err(error) = child.kill() {
                warn!(%error, "failed to kill dnsmasq");
            }
            let _ = child.wait();
        }
    }
}

impl Drop for LinuxNetd {
    fn drop(&mut self) {
        self.kill_dnsmasq();
    }
}

impl NetdClient for LinuxNetd {
    fn ip_forwarding_enable(&mut self, tag: &str) -> Result<(), NetdError> {
        debug!(%tag, "enabling IP forwarding");
        Self::sysctl_write(IPV4_FORWARDING_CTL, "1")?;
        Self::sysctl_write(IPV6_FORWARDING_CTL, "1")?;
        Ok(())
    }

    fn ip_forwarding_disable(&mut self, tag: &str) -> Result<(), NetdError> {
        debug!(%tag, "disabling IP forwarding");
        Self::sysctl_write(IPV4_FORWARDING_CTL, "0")?;
        Self::sysctl_write(IPV6_FORWARDING_CTL, "0")?;
        Ok(())
    }

    fn tether_start(
        &mut self,
        using_legacy_dns_proxy: bool,
        dhcp_ranges: &[String],
    ) -> Result<(), NetdError> {
        if self.dnsmasq.is_some() {
            return Err(NetdError::ServiceSpecific {
                code: libc::EBUSY,
                message: "tethering already started".to_owned(),
            });
        }
        debug!(%using_legacy_dns_proxy, "starting tethering");
        self.dhcp_ranges = dhcp_ranges.to_vec();
        self.spawn_dnsmasq()
    }

    fn tether_stop(&mut self) -> Result<(), NetdError> {
        debug!("stopping tethering");
        self.kill_dnsmasq();
        self.dhcp_ranges.clear();
        self.dns_servers.clear();
        Ok(())
    }

    fn tether_dns_set(
        &mut self,
        net_id: u32,
        dns_servers: &[IpAddr],
    ) -> Result<(), NetdError> {
        debug!(%net_id, ?dns_servers, "setting DNS forwarders");
        if self.dns_servers == dns_servers {
            return Ok(());
        }
        self.dns_servers = dns_servers.to_vec();
        // dnsmasq only picks servers up at startup.
        if self.dnsmasq.is_some() {
            self.kill_dnsmasq();
            self.spawn_dnsmasq()?;
        }
        Ok(())
    }

    fn interface_get_list(&mut self) -> Result<Vec<String>, NetdError> {
        let ifaces = nix::net::if_::if_nameindex().map_err(|errno| {
            NetdError::ServiceSpecific {
                code: errno as i32,
                message: "if_nameindex failed".to_owned(),
            }
        })?;
        Ok(ifaces
            .iter()
            .map(|iface| iface.name().to_string_lossy().into_owned())
            .collect())
    }
}
