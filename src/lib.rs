//! GPU execution-trace generator.
//!
//! Consumes dynamic per-instruction events from a PTX emulator (active-lane
//! masks, per-lane memory addresses, branch outcomes) and turns them into a
//! compact per-warp binary trace consumed by an external architecture
//! simulator. Timing is explicitly not modeled here.

#![allow(
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation
)]

pub mod active_mask;
pub mod config;
pub mod dim;
pub mod instruction;
pub mod model;
pub mod occupancy;
pub mod opcodes;
pub mod record;
pub mod session;
pub mod sink;
pub mod warp;

pub use active_mask::{ActiveMask, ToBitString};
pub use config::Config;
pub use dim::Dim;
pub use model::{InstructionEvent, KernelDescriptor, MemAllocation};
pub use record::{TraceRecord, RECORD_BYTES, TRACE_FORMAT_VERSION};
pub use session::{KernelSession, TraceRun};
pub use warp::WarpEventProcessor;

/// Number of lanes executing in lockstep; the unit of trace-record emission.
pub const WARP_SIZE: usize = 32;
