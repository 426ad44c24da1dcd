//! Bounded retries for ALSA error recovery.

/// Counts consecutive device errors so a device that keeps failing after a
/// successful `prepare()` cannot spin a read or write loop forever.
#[derive(Debug, Clone)]
pub struct RetryLimit {
    max: u32,
    consecutive: u32,
}

impl RetryLimit {
    pub const fn new(max: u32) -> Self {
        Self { max, consecutive: 0 }
    }

    /// Record a failure. Returns false once `max` failures in a row have
    /// been seen.
    pub fn fail(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive < self.max
    }

    pub fn succeed(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}
