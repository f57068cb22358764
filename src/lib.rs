mod client;
pub mod capture;
pub mod devices;
pub mod error;
pub mod native;
pub mod playback;
pub mod session;
pub mod tools;
pub mod transport;

#[cfg(test)]
mod testing;

pub use gemini_live_types as types;
pub use gemini_live_utils as utils;

pub use client::{connect, connect_with_config, Client, Config, ConfigBuilder, GeminiConnector, Stats};
pub use error::{Error, Result};
pub use session::{Activity, SessionController, SessionHandle, SessionOptions, SessionState};
pub use tools::{LiveSnapshot, LiveSnapshotProvider, SharedSnapshot, ToolCallDispatcher};
