//! Kernel service registry.
//!
//! Subsystem crates must not depend on the crates that implement the
//! filesystem, entropy source, or segment programming; those live above
//! them in the build graph. Instead, each collaborator publishes a struct of
//! function pointers here, registered once during boot by the crate that can
//! see both sides. Consumers fetch the struct through an accessor and call
//! through it.

mod cell;
pub mod fs;
pub mod platform;

pub use cell::ServiceCell;
