//! Drivers for measurement hardware.

pub mod ina219;

pub use ina219::Ina219;
