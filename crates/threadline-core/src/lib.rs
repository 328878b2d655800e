pub mod content;
pub mod engine;
pub mod errors;
pub mod events;
pub mod ids;
pub mod session;
