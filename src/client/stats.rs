/// Traffic counters for one connector, across all of its connections.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Stats {
    chunks_sent: u64,
    bytes_sent: u64,
    chunks_received: u64,
    bytes_received: u64,
    tool_calls: u64,
    total_tokens: u64,
    prompt_tokens: u64,
    response_tokens: u64,
}

impl Stats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_sent(&mut self, bytes: usize) {
        self.chunks_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub(crate) fn record_received(&mut self, bytes: usize) {
        self.chunks_received += 1;
        self.bytes_received += bytes as u64;
    }

    pub(crate) fn record_tool_call(&mut self) {
        self.tool_calls += 1;
    }

    pub(crate) fn update_usage(&mut self, total: u32, prompt: u32, response: u32) {
        self.total_tokens += total as u64;
        self.prompt_tokens += prompt as u64;
        self.response_tokens += response as u64;
    }

    pub fn chunks_sent(&self) -> u64 {
        self.chunks_sent
    }

    /// PCM bytes, before base64.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn chunks_received(&self) -> u64 {
        self.chunks_received
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn tool_calls(&self) -> u64 {
        self.tool_calls
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    pub fn prompt_tokens(&self) -> u64 {
        self.prompt_tokens
    }

    pub fn response_tokens(&self) -> u64 {
        self.response_tokens
    }
}
