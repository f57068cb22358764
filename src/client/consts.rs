use std::time::Duration;

pub const GEMINI_API_KEY: &str = "GEMINI_API_KEY";
pub const API_KEY: &str = "API_KEY";

pub const BASE_URL: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

pub const DEFAULT_CAPACITY: usize = 1024;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
/// How long `close` lets the writer flush before dropping it.
pub const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);
