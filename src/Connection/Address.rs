// Connection addressing and integrity levels (spec §3, §4.6).

use std::net::IpAddr;

/// Identifies one endpoint of a connection: an IP domain plus a unicast
/// port. Ordered lexicographically on `(domain, port)` so it can key a
/// sorted registry in `ConnectionManager` (spec §4.7). `port` is `u32` per
/// the wire data model (spec §3/§6: "`(uint32 domain, uint32 port)`"), not
/// the 16-bit range a real UDP/TCP port number occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IpcUnicastAddress {
    pub domain: IpAddr,
    pub port: u32,
}

impl IpcUnicastAddress {
    pub fn new(domain: IpAddr, port: u32) -> Self {
        Self { domain, port }
    }
}

impl std::fmt::Display for IpcUnicastAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.domain, self.port)
    }
}

/// AUTOSAR-style ASIL integrity classification, ascending by severity. A
/// connection's negotiated level must meet or exceed the level required by
/// the service instance it binds to (spec §4.6, "Integrity negotiation").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum IntegrityLevel {
    Qm = 0,
    AsilA = 1,
    AsilB = 2,
    AsilC = 3,
    AsilD = 4,
}

impl IntegrityLevel {
    pub fn meets(self, required: IntegrityLevel) -> bool {
        self >= required
    }
}
