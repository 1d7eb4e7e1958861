/// Identity of the current process and liveness of others.
///
/// Lock ownership is recorded and checked through this port, so tests can
/// stand in for a second holder or a dead one.
pub trait ProcessIdentity: Send + Sync {
    /// Process id written into lock records.
    fn pid(&self) -> u32;

    /// Host name written into lock records.
    fn hostname(&self) -> String;

    /// User name written into lock records.
    fn username(&self) -> String;

    /// Whether a process with `pid` exists on this host.
    ///
    /// Only meaningful for local holders: a holder on another host sharing
    /// the repository over a network filesystem cannot be probed.
    fn is_alive(&self, pid: u32) -> bool;
}
