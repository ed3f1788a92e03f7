use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};

/// One hop of a recorded route; `None` is a hole (no reply at that TTL)
pub type RouteHop = Option<Ipv4Addr>;

/// Confidence of a subnet inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubnetState {
    /// Borders confirmed by probing
    Accurate,
    /// Borders confirmed, but with an outlier interface
    Odd,
    /// Inferred without a directly responsive member
    Shadow,
    /// Borders unknown
    Undefined,
}

impl SubnetState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accurate => "ACCURATE",
            Self::Odd => "ODD",
            Self::Shadow => "SHADOW",
            Self::Undefined => "UNDEFINED",
        }
    }

    /// States usable for topology construction
    pub fn is_valid(&self) -> bool {
        !matches!(self, Self::Undefined)
    }
}

impl fmt::Display for SubnetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubnetState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ACCURATE" => Ok(Self::Accurate),
            "ODD" => Ok(Self::Odd),
            "SHADOW" => Ok(Self::Shadow),
            "UNDEFINED" => Ok(Self::Undefined),
            other => Err(Error::parse(format!("unknown subnet state: {}", other))),
        }
    }
}

/// A live address attributed to a subnet, with the TTL it answered at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteInterface {
    pub addr: Ipv4Addr,
    pub ttl: u8,
}

/// A subnet discovered by probing, along with the route used to reach it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnetSite {
    pub network: Ipv4Network,
    pub state: SubnetState,
    /// Hop count to the pivot (a responsive member)
    pub pivot_ttl: u8,
    pub route: Vec<RouteHop>,
    pub interfaces: Vec<SiteInterface>,
}

impl SubnetSite {
    pub fn new(network: Ipv4Network, state: SubnetState, pivot_ttl: u8) -> Self {
        Self {
            network,
            state,
            pivot_ttl,
            route: Vec::new(),
            interfaces: Vec::new(),
        }
    }

    /// Build a site from explicit borders, rejecting inverted or non-CIDR ranges
    pub fn from_borders(
        lower: Ipv4Addr,
        upper: Ipv4Addr,
        state: SubnetState,
        pivot_ttl: u8,
    ) -> Result<Self> {
        let (lo, hi) = (u32::from(lower), u32::from(upper));
        if hi < lo {
            return Err(Error::InvalidBorders { lower, upper });
        }

        // Span must be a power of two and the lower border aligned on it
        let span = (hi - lo) as u64 + 1;
        if !span.is_power_of_two() || (lo as u64) % span != 0 {
            return Err(Error::InvalidBorders { lower, upper });
        }
        let prefix = 32 - span.trailing_zeros() as u8;
        let network =
            Ipv4Network::new(lower, prefix).map_err(|_| Error::InvalidBorders { lower, upper })?;

        Ok(Self::new(network, state, pivot_ttl))
    }

    pub fn with_route(mut self, route: Vec<RouteHop>) -> Self {
        self.route = route;
        self
    }

    pub fn with_interface(mut self, addr: Ipv4Addr, ttl: u8) -> Self {
        self.add_interface(addr, ttl);
        self
    }

    pub fn lower_border(&self) -> Ipv4Addr {
        self.network.network()
    }

    pub fn upper_border(&self) -> Ipv4Addr {
        self.network.broadcast()
    }

    pub fn prefix(&self) -> u8 {
        self.network.prefix()
    }

    /// Sort key: numeric lower border, then prefix length
    pub fn cidr_key(&self) -> (u32, u8) {
        (u32::from(self.lower_border()), self.prefix())
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.network.contains(addr)
    }

    /// True if `other`'s range lies within this site's range (bounds inclusive)
    pub fn encompasses(&self, other: &SubnetSite) -> bool {
        self.lower_border() <= other.lower_border() && self.upper_border() >= other.upper_border()
    }

    pub fn same_range(&self, other: &SubnetSite) -> bool {
        self.network == other.network
    }

    /// Overlap test against a raw range
    pub fn overlaps(&self, lower: Ipv4Addr, upper: Ipv4Addr) -> bool {
        self.lower_border() <= upper && lower <= self.upper_border()
    }

    pub fn has_interface(&self, addr: Ipv4Addr) -> bool {
        self.interfaces.iter().any(|i| i.addr == addr)
    }

    /// Attribute a live address to this site; returns false if already known
    pub fn add_interface(&mut self, addr: Ipv4Addr, ttl: u8) -> bool {
        if self.has_interface(addr) {
            return false;
        }
        self.interfaces.push(SiteInterface { addr, ttl });
        self.interfaces.sort_by_key(|i| i.addr);
        true
    }

    /// Take over the interfaces of `other` that fall in this range and are not yet listed
    pub fn absorb_interfaces(&mut self, other: &SubnetSite) -> usize {
        let mut added = 0;
        for iface in &other.interfaces {
            if self.contains(iface.addr) && self.add_interface(iface.addr, iface.ttl) {
                added += 1;
            }
        }
        added
    }

    /// Interfaces answering one hop before the pivot (ingress side of the subnet)
    pub fn contra_pivots(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.interfaces
            .iter()
            .filter(|i| i.ttl.checked_add(1) == Some(self.pivot_ttl))
            .map(|i| i.addr)
    }

    /// Number of live interfaces known for this site
    pub fn live_interfaces(&self) -> usize {
        self.interfaces.len()
    }

    pub fn route_holes(&self) -> usize {
        self.route.iter().filter(|h| h.is_none()).count()
    }

    /// Route is known and has no hole
    pub fn has_complete_route(&self) -> bool {
        !self.route.is_empty() && self.route_holes() == 0
    }

    pub fn route_starts_with(&self, prefix: &[RouteHop]) -> bool {
        self.route.len() >= prefix.len() && self.route[..prefix.len()] == *prefix
    }

    /// Replace a leading route segment; returns false if the route does not start with `old`
    pub fn graft(&mut self, old: &[RouteHop], new: &[RouteHop]) -> bool {
        if !self.route_starts_with(old) {
            return false;
        }
        let tail = self.route.split_off(old.len());
        self.route = new.iter().copied().chain(tail).collect();
        true
    }
}

fn format_hop(hop: &RouteHop) -> String {
    match hop {
        Some(addr) => addr.to_string(),
        None => "*".to_string(),
    }
}

fn parse_hop(s: &str) -> Result<RouteHop> {
    if s == "*" || s == "0.0.0.0" {
        return Ok(None);
    }
    s.parse::<Ipv4Addr>()
        .map(Some)
        .map_err(|_| Error::parse(format!("invalid route hop: {}", s)))
}

/// Render a route as a comma-separated hop list (`-` when unknown)
pub fn format_route(route: &[RouteHop]) -> String {
    if route.is_empty() {
        return "-".to_string();
    }
    route.iter().map(format_hop).collect::<Vec<_>>().join(",")
}

/// Parse a comma-separated hop list
pub fn parse_route(s: &str) -> Result<Vec<RouteHop>> {
    if s == "-" {
        return Ok(Vec::new());
    }
    s.split(',').map(|h| parse_hop(h.trim())).collect()
}

impl fmt::Display for SubnetSite {
    /// `<cidr> <STATE> <pivot_ttl> <route> [<addr>:<ttl>,...]`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.network,
            self.state,
            self.pivot_ttl,
            format_route(&self.route)
        )?;
        if !self.interfaces.is_empty() {
            let ifaces: Vec<String> = self
                .interfaces
                .iter()
                .map(|i| format!("{}:{}", i.addr, i.ttl))
                .collect();
            write!(f, " {}", ifaces.join(","))?;
        }
        Ok(())
    }
}

impl FromStr for SubnetSite {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 || fields.len() > 5 {
            return Err(Error::parse(format!(
                "expected 4 or 5 fields, found {}",
                fields.len()
            )));
        }

        let network: Ipv4Network = fields[0]
            .parse()
            .map_err(|_| Error::parse(format!("invalid CIDR: {}", fields[0])))?;
        // Normalize host bits away (10.0.0.7/24 -> 10.0.0.0/24)
        let network = Ipv4Network::new(network.network(), network.prefix())
            .map_err(|_| Error::parse(format!("invalid CIDR: {}", fields[0])))?;
        let state: SubnetState = fields[1].parse()?;
        let pivot_ttl: u8 = fields[2]
            .parse()
            .map_err(|_| Error::parse(format!("invalid pivot TTL: {}", fields[2])))?;
        if pivot_ttl == 0 {
            return Err(Error::ZeroPivotTtl(network.to_string()));
        }

        let mut site = SubnetSite::new(network, state, pivot_ttl).with_route(parse_route(fields[3])?);

        if let Some(ifaces) = fields.get(4) {
            for entry in ifaces.split(',') {
                let (addr, ttl) = entry
                    .split_once(':')
                    .ok_or_else(|| Error::parse(format!("invalid interface: {}", entry)))?;
                let addr: Ipv4Addr = addr
                    .parse()
                    .map_err(|_| Error::parse(format!("invalid interface address: {}", addr)))?;
                let ttl: u8 = ttl
                    .parse()
                    .map_err(|_| Error::parse(format!("invalid interface TTL: {}", ttl)))?;
                site.add_interface(addr, ttl);
            }
        }

        Ok(site)
    }
}

/// Parse a block of subnet records, one per line (blank lines and `#` comments skipped)
pub fn parse_sites(text: &str) -> Result<Vec<SubnetSite>> {
    text.lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'))
        .map(|(n, l)| l.parse::<SubnetSite>().map_err(|e| e.at_line(n)))
        .collect()
}

/// Read a subnet file and parse every record in it
pub fn read_sites(path: impl AsRef<Path>) -> Result<Vec<SubnetSite>> {
    let text = std::fs::read_to_string(path)?;
    parse_sites(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_from_borders_valid() {
        let site =
            SubnetSite::from_borders(ip("10.0.0.0"), ip("10.0.0.255"), SubnetState::Accurate, 3)
                .unwrap();
        assert_eq!(site.prefix(), 24);
        assert_eq!(site.lower_border(), ip("10.0.0.0"));
        assert_eq!(site.upper_border(), ip("10.0.0.255"));
    }

    #[test]
    fn test_from_borders_rejects_inverted() {
        let err = SubnetSite::from_borders(ip("10.0.0.9"), ip("10.0.0.1"), SubnetState::Odd, 3);
        assert!(matches!(err, Err(Error::InvalidBorders { .. })));
    }

    #[test]
    fn test_from_borders_rejects_unaligned() {
        let err = SubnetSite::from_borders(ip("10.0.0.2"), ip("10.0.0.5"), SubnetState::Odd, 3);
        assert!(matches!(err, Err(Error::InvalidBorders { .. })));
    }

    #[test]
    fn test_from_borders_single_host() {
        let site =
            SubnetSite::from_borders(ip("10.0.0.7"), ip("10.0.0.7"), SubnetState::Accurate, 2)
                .unwrap();
        assert_eq!(site.prefix(), 32);
        assert!(site.contains(ip("10.0.0.7")));
    }

    #[test]
    fn test_parse_line() {
        let site: SubnetSite = "10.0.1.0/24 ACCURATE 4 10.0.0.1,*,10.0.0.9 10.0.1.1:4,10.0.1.254:3"
            .parse()
            .unwrap();
        assert_eq!(site.state, SubnetState::Accurate);
        assert_eq!(site.pivot_ttl, 4);
        assert_eq!(site.route, vec![Some(ip("10.0.0.1")), None, Some(ip("10.0.0.9"))]);
        assert_eq!(site.route_holes(), 1);
        assert!(!site.has_complete_route());
        assert_eq!(site.contra_pivots().collect::<Vec<_>>(), vec![ip("10.0.1.254")]);
    }

    #[test]
    fn test_parse_normalizes_host_bits() {
        let site: SubnetSite = "10.0.1.77/24 ODD 2 -".parse().unwrap();
        assert_eq!(site.lower_border(), ip("10.0.1.0"));
        assert!(site.route.is_empty());
    }

    #[test]
    fn test_parse_errors() {
        assert!("10.0.1.0/24 ACCURATE".parse::<SubnetSite>().is_err());
        assert!("10.0.1.0/24 BOGUS 3 -".parse::<SubnetSite>().is_err());
        assert!(matches!(
            "10.0.1.0/24 ACCURATE 0 -".parse::<SubnetSite>(),
            Err(Error::ZeroPivotTtl(_))
        ));
        assert!("10.0.1.0/24 ACCURATE 3 10.0.0.300".parse::<SubnetSite>().is_err());
    }

    #[test]
    fn test_display_matches_input_layout() {
        let line = "10.0.1.0/24 SHADOW 3 10.0.0.1,* 10.0.1.1:3";
        let site: SubnetSite = line.parse().unwrap();
        assert_eq!(site.to_string(), line);
    }

    #[test]
    fn test_parse_sites_reports_line() {
        let text = "# header\n10.0.0.0/24 ACCURATE 2 10.9.9.9\n\n10.0.1.0/24 ACCURATE x -\n";
        match parse_sites(text) {
            Err(Error::Parse { line, .. }) => assert_eq!(line, 4),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_graft() {
        let mut site: SubnetSite = "10.0.1.0/24 ACCURATE 4 1.1.1.1,2.2.2.2,3.3.3.3".parse().unwrap();
        let old = vec![Some(ip("1.1.1.1")), Some(ip("2.2.2.2"))];
        let new = vec![Some(ip("9.9.9.9"))];
        assert!(site.graft(&old, &new));
        assert_eq!(site.route, vec![Some(ip("9.9.9.9")), Some(ip("3.3.3.3"))]);
        // Second application no longer matches
        assert!(!site.graft(&old, &new));
    }

    #[test]
    fn test_absorb_interfaces_only_in_range() {
        let mut big: SubnetSite = "10.0.0.0/23 ACCURATE 3 - 10.0.0.1:3".parse().unwrap();
        let small: SubnetSite = "10.0.1.0/24 ACCURATE 3 - 10.0.0.1:3,10.0.1.5:3".parse().unwrap();
        assert_eq!(big.absorb_interfaces(&small), 1);
        assert!(big.has_interface("10.0.1.5".parse().unwrap()));
    }

    #[test]
    fn test_read_sites_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sites.txt");
        std::fs::write(&path, "# probed\n10.0.0.0/24 ACCURATE 2 1.1.1.1\n").unwrap();

        let sites = read_sites(&path).unwrap();
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].route, vec![Some(ip("1.1.1.1"))]);

        let missing = read_sites(dir.path().join("absent.txt"));
        assert!(matches!(missing, Err(Error::Io(_))));
    }
}
