//! Utilities for testing code that talks to a [crate::socket::DatagramSocket]. They are used
//!  for testing the protocol itself, and they are exported so that applications can exercise
//!  their transfer code without real sockets.

pub mod channel_socket;
