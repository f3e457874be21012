use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Role {
    Initiator,
    Responder,
}
impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Initiator => write!(f, "initiator"),
            Role::Responder => write!(f, "responder"),
        }
    }
}

/// The outcome of a successful handshake. All state of a transfer is owned by its session
///  and the loop working on it, nothing is shared between sessions.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Session {
    /// correlates log output of a session; never sent on the wire
    pub id: Uuid,
    pub role: Role,
    pub peer_addr: SocketAddr,
    pub initiator_isn: u32,
    pub responder_isn: u32,
}

impl Session {
    /// Data packets are numbered starting with the initiator's initial sequence number
    pub fn first_data_sequence_number(&self) -> u32 {
        self.initiator_isn
    }
}
