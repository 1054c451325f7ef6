//! Capability dispatch (triage).

pub mod dispatcher;

pub use dispatcher::{
    DispatchOptions, DispatchOutcome, Dispatcher, InvocationRecord, InvocationStatus, drain,
};
