pub mod anthropic;
pub mod openai;
pub mod registry;
pub mod traits;

pub use registry::create_provider;
pub use traits::{AIProvider, ChatRequest, ChatResponse, Message, Role, StopReason, Usage};
