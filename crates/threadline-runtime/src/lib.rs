pub mod echo;
pub mod error;
pub mod fork;
pub mod frames;
pub mod history;
pub mod input;
pub mod mock;
pub mod presenter;
pub mod service;
pub mod title;

pub use error::RuntimeError;
pub use service::{ConversationService, ServiceConfig};
