//! hive-mind: capability dispatch and human-in-the-loop workflows.

pub mod agent;
pub mod api;
pub mod capabilities;
pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod error;
pub mod llm;
pub mod session;
pub mod stream_bridge;
pub mod workflow;
pub mod workspace;
