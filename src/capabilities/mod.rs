//! Capabilities: discrete units of functionality the dispatcher can select.

pub mod builtin;
pub mod capability;
pub mod coerce;
pub mod registry;

pub use capability::*;
pub use coerce::coerce_arguments;
pub use registry::CapabilityRegistry;
