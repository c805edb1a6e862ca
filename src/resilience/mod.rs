//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Logical call with candidates [c0, c1, c2]
//!     → failover.rs sends to c0, arms min(failover, remaining) timer
//!     → response            → settle success, cancel the rest
//!     → retriable error     → policy.rs agrees → send to next candidate now
//!     → timer fires         → send to next candidate, keep c0 running
//!     → global deadline     → settle timeout
//! ```
//!
//! # Design Decisions
//! - Every call has a deadline; the failover timer never extends it
//! - First settlement wins; losing attempts are cancelled, not ignored
//! - Exhaustion and timeout are distinct errors

pub mod error;
pub mod failover;
pub mod policy;

pub use error::{CallError, ErrorKind};
pub use failover::{CallCanceller, CallHandle, CallResult, FailoverExecutor, FailoverOptions};
pub use policy::{DefaultFailoverPolicy, FailoverPolicy};
