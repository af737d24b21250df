//! Veto manager for Conclave sessions.
//!
//! A veto is a blocking objection raised by an authorized agent. Its level
//! is fixed when it is submitted and decides whether it can ever be lifted:
//!
//! | Level    | Override path                                   |
//! |----------|-------------------------------------------------|
//! | Absolute | never                                           |
//! | Strong   | human escalation outside the system (never here) |
//! | Advisory | any role with approval permission               |

pub mod manager;

pub use manager::{OverrideRejection, VetoManager, VetoRecord, VetoRejection, VetoStats};
