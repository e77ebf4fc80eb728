//! Types and facilities for sampling an INA219 power monitor and sharing its readings.

#![deny(missing_docs)]

pub mod channel;
pub mod config;
pub mod coordinator;
pub mod hw;
pub mod observer;
pub mod snapshot;
