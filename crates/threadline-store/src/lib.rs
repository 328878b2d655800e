pub mod database;
pub mod error;
pub mod events;
pub mod registry;
pub mod row_helpers;
pub mod schema;
pub mod sessions;
pub mod shares;

pub use database::Database;
pub use error::StoreError;
pub use events::EventRepo;
pub use registry::{SessionMeta, ThreadPosition, ThreadRegistry};
pub use sessions::{SessionRepo, SessionRow};
pub use shares::{ShareRepo, ShareRow};
