pub mod composer;
pub mod controller;
pub mod humanize;
pub mod session;
pub mod sync;
pub mod view;

pub use controller::{ChatController, ChatEvent, ChatSnapshot};
pub use view::{Screen, render};
