//! Per-request execution context
//!
//! Everything that used to be ambient (current message id, request
//! timestamp, trade counter) travels explicitly with the processing call.

/// Explicit state for one sequenced request.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Correlates every event this request emits.
    pub message_id: String,
    /// Unix nanos; the single timestamp all mutations of this request use.
    pub timestamp: i64,
    /// Index of the next trade within this request.
    pub trade_index: u64,
}

impl ExecutionContext {
    pub fn new(message_id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            message_id: message_id.into(),
            timestamp,
            trade_index: 0,
        }
    }

    pub fn next_trade_index(&mut self) -> u64 {
        let index = self.trade_index;
        self.trade_index += 1;
        index
    }
}
