//! # Domain Models
//!
//! These structs represent the core entities of the CRM.
//! We use UUID v7 for time-ordered, globally unique identification.
//! All records serialize camelCase so they can cross the web boundary as-is.

mod campaign;
mod customer;
mod delivery;
mod order;
mod segment;

pub use campaign::*;
pub use customer::*;
pub use delivery::*;
pub use order::*;
pub use segment::*;
