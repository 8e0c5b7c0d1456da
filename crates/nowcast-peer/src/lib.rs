//! Protocol engine for nowcast.
//!
//! Two roles share one link-agnostic engine:
//! - [`SenderNode`] admits receivers that ask to register, acknowledges
//!   them, emits keepalives and fans application data out to every
//!   admitted receiver.
//! - [`ReceiverNode`] broadcasts registration requests until a sender
//!   acknowledges it, then watches keepalives and starts over when they
//!   stop.
//!
//! Frames travel through bounded queues on both sides. The link's receive
//! callback only copies and enqueues; decoding, sequence filtering and
//! dispatch happen on a worker task.

pub mod admission;
pub mod config;
pub mod error;
pub mod inbound;
pub mod keepalive;
pub mod node;
pub mod outbound;
pub mod registration;
pub mod sequence;
pub mod stats;

pub use admission::{Admission, AdmissionOutcome};
pub use config::NodeConfig;
pub use error::{AdmissionError, NodeError, Result, SequenceError};
pub use inbound::{AppMessage, DataKind, DiscardReason, Dispatch, Envelope, InboundMessage};
pub use node::{ReceiverNode, SenderNode};
pub use outbound::{Outbound, OutboundRequest};
pub use registration::{Registration, RegistrationState};
pub use sequence::{SendSequencer, SequenceSpace, SequenceTracker};
pub use stats::{PipelineStats, StatsSnapshot};
