//! # tether-core
//!
//! Shared vocabulary for the tether workspace: ids, voice states, the
//! presence event bus, the process status seam, and the error type.

pub mod error;
pub mod event;
pub mod status;
pub mod types;

pub use error::{Result, TetherError};
pub use event::{Event, EventBus};
pub use status::{ProcessStatus, StatusSource, resident_memory_bytes, total_memory_bytes};
pub use types::*;
