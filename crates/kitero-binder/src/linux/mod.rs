//! `tc`/`iptables`/`ip` backed [`Binder`] implementation for Linux hosts.
//!
//! One routing table per outgoing interface is assumed to already exist
//! (named after the interface), with routes that let traffic flow to it.
//! This binder only installs the `ip rule` / `tc` / `iptables` plumbing
//! that steers and shapes traffic into those tables; it never creates
//! the tables or routes themselves.

mod templates;

use std::collections::HashMap;

use kitero_core::{BindEvent, Binder, Direction, InterfaceStats, Mark, RouterView, SlotAllocator, StatsProvider, TicketAllocator};
use kitero_exec::CommandRunner;

use crate::error::LinuxBinderError;

/// Chain names and sizing knobs for a [`LinuxBinder`].
#[derive(Debug, Clone)]
pub struct LinuxBinderConfig {
    pub prerouting: String,
    pub postrouting: String,
    pub accounting: String,
    /// Maximum number of clients bound to the same outgoing interface at
    /// once; sizes the slot field of the firewall mark.
    pub max_users: u32,
}

impl Default for LinuxBinderConfig {
    fn default() -> Self {
        Self {
            prerouting: "kitero-PREROUTING".to_string(),
            postrouting: "kitero-POSTROUTING".to_string(),
            accounting: "kitero-ACCOUNTING".to_string(),
            max_users: 256,
        }
    }
}

/// What a client was bound with, tracked by the binder itself so an
/// `unbind` notification — which only carries the client address — can
/// still be reversed. `RouterView` intentionally exposes no per-client
/// state, so this table has no equivalent on the router side.
#[derive(Debug, Clone)]
struct ClientBinding {
    interface: String,
    qos: String,
    slot: u32,
    ticket: u32,
    mark: String,
    mask: String,
}

fn is_ipv6(client: &str) -> bool {
    client.contains(':')
}

fn iptables_for(client: &str) -> &'static str {
    if is_ipv6(client) {
        "ip6tables"
    } else {
        "iptables"
    }
}

fn ipcmd_for(ipv6: bool) -> (&'static str, &'static str) {
    if ipv6 {
        ("ip", "-6")
    } else {
        ("ip", "")
    }
}

/// Applies `tc`/`iptables`/`ip` configuration to bind clients to an
/// outgoing interface and QoS profile. Handles both IPv4 and IPv6
/// clients and tolerates SNAT on the outgoing interface (marks survive
/// `POSTROUTING` via `CONNMARK --save-mark` since the source address
/// itself may be gone by the time packets reach it).
pub struct LinuxBinder {
    config: LinuxBinderConfig,
    bound_view: Option<RouterView>,
    interface_index: HashMap<String, u32>,
    mark: Option<Mark>,
    slots: SlotAllocator,
    tickets: TicketAllocator,
    bindings: HashMap<String, ClientBinding>,
}

impl LinuxBinder {
    pub fn new(config: LinuxBinderConfig) -> Self {
        Self {
            config,
            bound_view: None,
            interface_index: HashMap::new(),
            mark: None,
            slots: SlotAllocator::default(),
            tickets: TicketAllocator::new(),
            bindings: HashMap::new(),
        }
    }

    /// Wraps this binder so it rejects IPv6 clients up front.
    pub fn ipv4_only(self) -> LinuxBinderIpv4 {
        LinuxBinderIpv4(self)
    }

    fn ensure_bound(&mut self, view: &RouterView) -> Result<(), LinuxBinderError> {
        match &self.bound_view {
            None => {
                self.setup(view)?;
                self.bound_view = Some(view.clone());
                Ok(())
            }
            Some(bound) if bound == view => Ok(()),
            Some(_) => Err(LinuxBinderError::RouterMismatch),
        }
    }

    /// Tears down and recreates the mangle chains, per-interface root
    /// queueing disciplines and policy-routing rules. Run once, the
    /// first time this binder observes a bind or unbind event.
    fn setup(&mut self, view: &RouterView) -> Result<(), LinuxBinderError> {
        let mut interfaces: Vec<&String> = view.interfaces.keys().collect();
        interfaces.sort();
        self.interface_index = interfaces
            .iter()
            .enumerate()
            .map(|(i, name)| ((*name).clone(), i as u32))
            .collect();
        self.mark = Some(Mark::new(interfaces.len() as u32, self.config.max_users)?);
        self.slots = SlotAllocator::new(self.config.max_users);
        self.tickets = TicketAllocator::new();

        for (chain, chain_upper) in [
            (&self.config.prerouting, "PREROUTING"),
            (&self.config.accounting, "POSTROUTING"),
            (&self.config.postrouting, "POSTROUTING"),
        ] {
            for iptables in ["iptables", "ip6tables"] {
                let subs = subs([
                    ("iptables", iptables),
                    ("chain", chain),
                    ("chain_upper", chain_upper),
                ]);
                let _ = CommandRunner::run_lenient(
                    &[templates::CHAIN_UNLINK, templates::CHAIN_FLUSH, templates::CHAIN_DELETE],
                    &subs,
                );
                CommandRunner::run(&[templates::CHAIN_NEW, templates::CHAIN_LINK], &subs)?;
            }
        }

        for iface in interfaces.iter().copied().chain(view.incoming.iter()) {
            let subs = subs([("iface", iface.as_str())]);
            let _ = CommandRunner::run_lenient(&[templates::TC_QDISC_DEL_ROOT], &subs);
            CommandRunner::run(
                &[
                    templates::TC_ROOT_DRR,
                    templates::TC_DEFAULT_CLASS,
                    templates::TC_DEFAULT_SFQ,
                    templates::TC_ARP_CLASSIFIER,
                ],
                &subs,
            )?;
            for iptables in ["iptables", "ip6tables"] {
                let subs = subs([
                    ("iptables", iptables),
                    ("postrouting", &self.config.postrouting),
                    ("iface", iface.as_str()),
                ]);
                CommandRunner::run(&[templates::MANGLE_DEFAULT_CLASSIFY], &subs)?;
            }
        }

        let mark = self.mark.as_ref().expect("mark sizing set above");
        for iface in &interfaces {
            let index = self.interface_index[iface.as_str()];
            let (m, _mask) = mark.at(Some(index), None);
            for (ip, flag) in [ipcmd_for(false), ipcmd_for(true)] {
                let ip_cmd = if flag.is_empty() {
                    ip.to_string()
                } else {
                    format!("{ip} {flag}")
                };
                let subs = subs([("ip", ip_cmd.as_str()), ("mark", &m), ("iface", iface.as_str())]);
                let _ = CommandRunner::run_lenient(&[templates::IP_RULE_DEL], &subs);
                CommandRunner::run(&[templates::IP_RULE_ADD], &subs)?;
            }
        }

        Ok(())
    }

    fn bind_client(
        &mut self,
        view: &RouterView,
        client: &str,
        interface: &str,
        qos: &str,
    ) -> Result<(), LinuxBinderError> {
        let index = *self
            .interface_index
            .get(interface)
            .ok_or_else(|| LinuxBinderError::UnknownInterfaceIndex(interface.to_string()))?;
        let slot = self.slots.request(interface, client)?;
        let ticket = self.tickets.request(client)?;
        let mark = self.mark.as_ref().expect("setup ran before any bind");
        let (m, mask) = mark.at(Some(index), Some(slot));

        let qos_profile = view
            .interfaces
            .get(interface)
            .and_then(|i| i.qos.get(qos))
            .ok_or_else(|| LinuxBinderError::UnknownInterfaceIndex(interface.to_string()))?;

        self.apply_qos(view, client, interface, qos_profile, ticket, true)?;
        self.apply_marking(view, client, interface, &m, &mask, ticket, true)?;

        self.bindings.insert(
            client.to_string(),
            ClientBinding {
                interface: interface.to_string(),
                qos: qos.to_string(),
                slot,
                ticket,
                mark: m,
                mask,
            },
        );
        Ok(())
    }

    fn unbind_client(&mut self, view: &RouterView, client: &str) -> Result<(), LinuxBinderError> {
        let binding = self
            .bindings
            .get(client)
            .ok_or_else(|| LinuxBinderError::MissingBinding(client.to_string()))?
            .clone();

        let qos_profile = view
            .interfaces
            .get(&binding.interface)
            .and_then(|i| i.qos.get(&binding.qos))
            .ok_or_else(|| LinuxBinderError::UnknownInterfaceIndex(binding.interface.clone()))?;

        self.apply_marking(
            view,
            client,
            &binding.interface,
            &binding.mark,
            &binding.mask,
            binding.ticket,
            false,
        )?;
        // tc state is torn down in reverse dependency order: children
        // (netem/tbf/sfq) before the parent class, the opposite of the
        // order bind installs them in. Deleting only the class and
        // relying on the kernel to cascade the rest works too, but the
        // explicit teardown makes bind/unbind a literal inverse pair,
        // which is what this binder is tested against.
        self.apply_qos(view, client, &binding.interface, qos_profile, binding.ticket, false)?;

        self.bindings.remove(client);
        self.slots.release(client)?;
        self.tickets.release(client)?;
        Ok(())
    }

    fn apply_qos(
        &self,
        view: &RouterView,
        _client: &str,
        interface: &str,
        qos: &kitero_core::QoS,
        ticket: u32,
        bind: bool,
    ) -> Result<(), LinuxBinderError> {
        let add = if bind { "add" } else { "del" };
        let ifaces: Vec<(&str, Direction)> = std::iter::once((interface, Direction::Up))
            .chain(view.incoming.iter().map(|i| (i.as_str(), Direction::Down)))
            .collect();

        for (iface, direction) in ifaces {
            let bw = qos.bandwidth(direction);
            let netem = qos.netem(direction);
            let mut templates = templates::qos_templates(bw, netem);
            if !bind {
                // Children before parents: the reverse of the install order.
                templates.reverse();
            }

            let subs = subs([
                ("iface", iface),
                ("add", add),
                ("ticket", &ticket.to_string()),
                ("bw", bw.unwrap_or("")),
                ("netem", netem.unwrap_or("")),
            ]);
            // Teardown is strict, same as setup: a failed delete is fatal
            // and must propagate, not be swallowed (spec §4.4/§7).
            CommandRunner::run(&templates, &subs)?;
        }
        Ok(())
    }

    fn apply_marking(
        &self,
        view: &RouterView,
        client: &str,
        outgoing: &str,
        mark: &str,
        mask: &str,
        ticket: u32,
        bind: bool,
    ) -> Result<(), LinuxBinderError> {
        let a = if bind { "A" } else { "D" };
        let iptables = iptables_for(client);

        for incoming in &view.incoming {
            let subs = subs([
                ("iptables", iptables),
                ("A", a),
                ("prerouting", &self.config.prerouting),
                ("incoming", incoming),
                ("client", client),
                ("mark", mark),
                ("mask", mask),
            ]);
            CommandRunner::run(&[templates::IPT_MARK], &subs)?;
        }

        let subs = subs([
            ("iptables", iptables),
            ("A", a),
            ("postrouting", &self.config.postrouting),
            ("outgoing", outgoing),
            ("client", client),
            ("mark", mark),
            ("mask", mask),
        ]);
        CommandRunner::run(&[templates::IPT_CONNMARK_SAVE], &subs)?;

        for iface in std::iter::once(outgoing).chain(view.incoming.iter().map(|s| s.as_str())) {
            let subs = subs([
                ("iptables", iptables),
                ("A", a),
                ("postrouting", &self.config.postrouting),
                ("iface", iface),
                ("mark", mark),
                ("mask", mask),
                ("ticket", &ticket.to_string()),
            ]);
            CommandRunner::run(&[templates::IPT_CLASSIFY], &subs)?;
        }

        let directed = std::iter::once(("up", outgoing))
            .chain(view.incoming.iter().map(|i| ("down", i.as_str())));
        for (direction, iface) in directed {
            let subs = subs([
                ("iptables", iptables),
                ("A", a),
                ("accounting", &self.config.accounting),
                ("iface", iface),
                ("mark", mark),
                ("mask", mask),
                ("direction", direction),
                ("outgoing", outgoing),
                ("client", client),
            ]);
            CommandRunner::run(&[templates::IPT_ACCOUNTING], &subs)?;
        }

        Ok(())
    }

    /// Parses the fixed-format `iptables -v -S <accounting chain>` listing
    /// into per-interface, per-client byte counters. There is no regular
    /// expression crate anywhere in this workspace's dependency graph, so
    /// this is a small hand-rolled line scanner instead of one compiled
    /// pattern, matching the fixed structure of rules this binder itself
    /// installed via `IPT_ACCOUNTING`.
    fn parse_accounting(output: &str) -> HashMap<String, InterfaceStats> {
        let mut stats: HashMap<String, InterfaceStats> = HashMap::new();
        for line in output.lines() {
            let Some(parsed) = parse_accounting_line(line) else {
                continue;
            };
            let entry = stats.entry(parsed.interface).or_default();
            let client_stats = entry.details.entry(parsed.client).or_default();
            match parsed.direction {
                "up" => client_stats.up = Some(client_stats.up.unwrap_or(0) + parsed.bytes),
                "down" => client_stats.down = Some(client_stats.down.unwrap_or(0) + parsed.bytes),
                _ => {}
            }
        }
        for iface in stats.values_mut() {
            iface.clients = iface.details.len();
            iface.up = Some(iface.details.values().filter_map(|c| c.up).sum());
            iface.down = Some(iface.details.values().filter_map(|c| c.down).sum());
        }
        stats
    }
}

struct AccountingLine {
    direction: &'static str,
    interface: String,
    client: String,
    bytes: u64,
}

/// Parses one line of `iptables -S <chain>` output, matching only the
/// rules this binder installs itself:
/// `... --comment "<up|down>-<interface>-<client>" -c <packets> <bytes>`.
fn parse_accounting_line(line: &str) -> Option<AccountingLine> {
    let comment_key = "--comment \"";
    let start = line.find(comment_key)? + comment_key.len();
    let end = start + line[start..].find('"')?;
    let comment = &line[start..end];

    let (direction, rest) = comment.split_once('-')?;
    let direction = match direction {
        "up" => "up",
        "down" => "down",
        _ => return None,
    };
    let (interface, client) = rest.rsplit_once('-')?;

    let counter_key = " -c ";
    let counter_start = line[end..].find(counter_key)? + end + counter_key.len();
    let mut fields = line[counter_start..].split_whitespace();
    let _packets = fields.next()?;
    let bytes: u64 = fields.next()?.parse().ok()?;

    Some(AccountingLine {
        direction,
        interface: interface.to_string(),
        client: client.to_string(),
        bytes,
    })
}

fn subs<const N: usize>(pairs: [(&str, &str); N]) -> HashMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl Binder for LinuxBinder {
    fn notify(&mut self, view: &RouterView, event: &BindEvent) -> Result<(), kitero_core::ObserverError> {
        self.ensure_bound(view)?;
        match event {
            BindEvent::Bind { client, interface, qos } => {
                tracing::info!(client, interface, qos, "binding client");
                self.bind_client(view, client, interface, qos)?;
            }
            BindEvent::Unbind { client } => {
                tracing::info!(client, "unbinding client");
                self.unbind_client(view, client)?;
            }
        }
        Ok(())
    }

    fn as_stats_provider(&self) -> Option<&dyn StatsProvider> {
        Some(self)
    }
}

impl StatsProvider for LinuxBinder {
    fn stats(&self) -> HashMap<String, InterfaceStats> {
        if self.bound_view.is_none() {
            return HashMap::new();
        }
        let mut combined = String::new();
        for iptables in ["iptables", "ip6tables"] {
            let subs = subs([("iptables", iptables), ("accounting", &self.config.accounting)]);
            if let Ok(out) = CommandRunner::run(&[templates::ACCOUNTING_LIST], &subs) {
                combined.push_str(&out.join("\n"));
                combined.push('\n');
            }
        }
        Self::parse_accounting(&combined)
    }
}

/// Wraps a [`LinuxBinder`] so it refuses to bind IPv6 clients. Useful on
/// deployments where the routing tables and `ip6tables` rules for v6
/// egress are not maintained.
pub struct LinuxBinderIpv4(LinuxBinder);

impl Binder for LinuxBinderIpv4 {
    fn notify(&mut self, view: &RouterView, event: &BindEvent) -> Result<(), kitero_core::ObserverError> {
        if let BindEvent::Bind { client, .. } = event {
            if is_ipv6(client) {
                return Err(LinuxBinderError::Ipv6Unsupported(client.clone()).into());
            }
        }
        self.0.notify(view, event)
    }

    fn as_stats_provider(&self) -> Option<&dyn StatsProvider> {
        Some(&self.0)
    }
}

impl StatsProvider for LinuxBinderIpv4 {
    fn stats(&self) -> HashMap<String, InterfaceStats> {
        self.0.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_accounting_lines() {
        let output = concat!(
            "-A kitero-ACCOUNTING -o eth1 -m connmark --mark 0x20000000/0xf0000000 ",
            "-m comment --comment \"up-eth1-192.168.15.2\" -c 12 3400\n",
            "-A kitero-ACCOUNTING -o eth0 -m connmark --mark 0x20000000/0xf0000000 ",
            "-m comment --comment \"down-eth1-192.168.15.2\" -c 40 9000\n",
        );
        let stats = LinuxBinder::parse_accounting(output);
        let eth1 = &stats["eth1"];
        assert_eq!(eth1.clients, 1);
        let client = &eth1.details["192.168.15.2"];
        assert_eq!(client.up, Some(3400));
        assert_eq!(client.down, Some(9000));
        assert_eq!(eth1.up, Some(3400));
        assert_eq!(eth1.down, Some(9000));
    }

    #[test]
    fn ignores_unrelated_lines() {
        let stats = LinuxBinder::parse_accounting("-A kitero-ACCOUNTING -o eth1 -j RETURN\n");
        assert!(stats.is_empty());
    }

    #[test]
    fn ipv6_detection() {
        assert!(is_ipv6("2001:db8::1"));
        assert!(!is_ipv6("192.168.15.2"));
    }
}
