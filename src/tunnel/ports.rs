//! Process-wide local port allocator.
//!
//! A port is reserved and probed in one critical section: the probe binds
//! `127.0.0.1:0`, and the kernel-chosen port is recorded before the lock is
//! released. No two live reservations ever share a port.

use std::collections::HashSet;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::{Mutex, OnceLock};

const MAX_ATTEMPTS: usize = 32;

fn reserved() -> &'static Mutex<HashSet<u16>> {
    static RESERVED: OnceLock<Mutex<HashSet<u16>>> = OnceLock::new();
    RESERVED.get_or_init(|| Mutex::new(HashSet::new()))
}

/// A reserved local port, released on drop.
#[derive(Debug)]
pub struct PortReservation {
    port: u16,
}

impl PortReservation {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortReservation {
    fn drop(&mut self) {
        let mut set = reserved().lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.port);
    }
}

/// Reserve a currently free local TCP port.
pub fn reserve_local_port() -> std::io::Result<PortReservation> {
    let mut set = reserved().lock().unwrap_or_else(|e| e.into_inner());
    for _ in 0..MAX_ATTEMPTS {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
        let port = listener.local_addr()?.port();
        drop(listener);
        if set.insert(port) {
            return Ok(PortReservation { port });
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::AddrInUse,
        "no unreserved local port available",
    ))
}

/// Whether `port` is held by a live reservation.
pub fn is_reserved(port: u16) -> bool {
    reserved()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .contains(&port)
}
