//! Newline-delimited JSON host bridge.
//!
//! The bridge keeps a mirror of the host-reported platform state, updated with
//! `platform.set`, and routes every remediation decision back to the host.

pub mod channel;
pub mod contract;
pub mod remediation;
pub mod stdio;
