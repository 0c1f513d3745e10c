//! Control parameters as functions of time

pub mod catalog;
pub mod inactivity;
pub mod temporal;

pub use catalog::{AxisCatalog, AxisId, UnknownAxis};
pub use inactivity::InactivityMonitor;
pub use temporal::{Axis, ConstantAxis, Interpolation, SharedAxis, TemporalAxis};
