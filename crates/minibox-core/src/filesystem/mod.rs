//! Filesystem preparation and root restriction.
//!
//! The staging directory gets the target executable and a `/dev/null`
//! before the process root is moved into it.

pub mod chroot;
pub mod confine;
pub mod devices;
pub mod executable;
