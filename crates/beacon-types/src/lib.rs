pub mod api;
pub mod audience;
pub mod error;
pub mod models;
pub mod tags;

pub use audience::{CustomGroup, CustomGroupRegistry, UserIdentity, Viewer};
pub use error::MessageError;
pub use models::{Level, PersistentMessage, Target};
