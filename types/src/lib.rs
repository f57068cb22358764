pub mod session;
pub mod tools;
pub mod audio;
pub mod events;
mod content;

pub use content::{Content, Part};
pub use events::{ClientMessage, ServerMessage};
pub use session::Setup;
