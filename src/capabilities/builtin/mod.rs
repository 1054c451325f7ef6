//! Built-in capabilities: arithmetic, crypto prices, sandboxed files,
//! question answering, and creating or editing capabilities.

pub mod answer;
pub mod create_capability;
pub mod crypto;
pub mod edit_capability;
pub mod file;
pub mod math;

pub use answer::AnswerQuestion;
pub use create_capability::CreateCapability;
pub use crypto::CryptoPrice;
pub use edit_capability::EditCapability;
pub use file::{ReadFile, WriteFile};
pub use math::AddNumbers;
