//! `jobscout-core`: shared building blocks.
//!
//! This crate contains **pure** primitives (no IO): identifiers, the job summary
//! model and its validation, time sources, and the message envelope exchanged
//! between the background service and the content side.

pub mod clock;
pub mod error;
pub mod id;
pub mod message;
pub mod summary;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{JobId, TabId};
pub use message::BackgroundResponse;
pub use summary::{JobSummary, Salary, SalaryPeriod, parse_summary};
