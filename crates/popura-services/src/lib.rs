//! popura-services: the background modules a Popura node runs.
//!
//! * `autopeer` keeps the node connected to at least one Internet peer.
//! * `radv` advertises the node's routed subnet to the local IPv6 segment.

pub mod autopeer;
pub mod radv;

pub use autopeer::AutoPeering;
pub use radv::RAdv;
