//! Applies cgroup resource limits to processes and reads usage statistics
//! back, on both the legacy (v1) and the unified (v2) hierarchy.
#[cfg(test)]
#[macro_use]
extern crate quickcheck;

mod test;

pub mod blkio;
pub mod common;
pub mod controller;
pub mod controller_type;
pub mod cpu;
pub mod device;
pub mod hierarchy;
pub mod manager;
pub mod memory;
pub mod pids;
pub mod stats;
