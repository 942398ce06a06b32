pub mod api;
pub mod events;
pub mod models;

pub use events::{SessionEvent, SessionEventKind};
pub use models::{Message, NewMessage, Session, User};
