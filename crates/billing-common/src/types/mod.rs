//! Core data types for the billing collector

pub mod billing_event;
pub mod time_window;
pub mod usage;
