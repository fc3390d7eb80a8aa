use std::time::Duration;

/// Timing knobs for a [`FileChannel`](crate::FileChannel).
#[derive(Debug, Clone)]
pub struct FileChannelConfig {
    /// Delay between inbound file checks. Default: 100 ms.
    pub poll_interval: Duration,
    /// Longest wait for the named lock before a send fails or a poll cycle
    /// is skipped. Default: 1 s.
    pub lock_timeout: Duration,
}

impl Default for FileChannelConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            lock_timeout: Duration::from_secs(1),
        }
    }
}
