//! Sender/receiver protocol over a connectionless, lossy radio link.
//!
//! One sender admits any number of receivers that announce themselves by
//! broadcasting registration requests, then pushes pattern and brightness
//! changes to them. Frames carry a CRC-16 and a per-source sequence number
//! so corrupted, duplicated and stale frames never reach the application.
//!
//! # Crate Structure
//!
//! - [`link`]: Link-layer boundary (in-memory medium, UDP emulation)
//! - [`frame`]: Wire format and payload registry
//! - [`peer`]: Protocol engine and node roles (behind `peer` feature)

/// Re-export link types.
pub mod link {
    pub use nowcast_link::*;
}

/// Re-export frame types.
pub mod frame {
    pub use nowcast_frame::*;
}

/// Re-export protocol engine types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use nowcast_peer::*;
}
