//! `engage360-core`: identifiers and error types shared by every Engage360 crate.
//!
//! Nothing in here performs IO.

pub mod error;
pub mod id;

pub use error::DomainError;
pub use id::{ActionId, BookingId, ProgramId, UserId};
