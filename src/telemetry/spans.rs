//! Span helpers for remote command handling.

use tracing::{info_span, Span};

/// Extension trait for recording an operation's outcome on its span.
pub trait SpanExt {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for per-command spans.
pub struct CommandSpan;

impl CommandSpan {
    /// `status` and `error.message` are filled in by [`SpanExt::record_result`].
    pub fn new(client_id: &str, command: &'static str) -> Span {
        info_span!(
            "remote_command",
            client_id = %client_id,
            command,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
        )
    }
}
