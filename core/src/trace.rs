//! Tracing utilities for query and transaction observability.
//!
//! Enable the `tracing` feature to emit spans and events via the `tracing` crate.
//! These macros no-op when the feature is disabled, avoiding `#[cfg]` boilerplate
//! at every call site. The feature is checked in the calling crate.

/// Emit a debug-level tracing event with the SQL text, parameter count and
/// elapsed milliseconds.
///
/// ```ignore
/// relq_trace_query!(&sql, bindings.len(), elapsed_ms);
/// ```
#[macro_export]
macro_rules! relq_trace_query {
    ($sql:expr, $param_count:expr, $elapsed_ms:expr) => {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            sql = %$sql,
            params = $param_count,
            elapsed_ms = $elapsed_ms,
            "relq.query"
        );
    };
}

/// Emit an info-level tracing event for transaction lifecycle (begin, savepoint,
/// release, rollback, commit) at a nesting level.
///
/// ```ignore
/// relq_trace_tx!("savepoint", level);
/// relq_trace_tx!("rollback_failed", level, err);
/// ```
#[macro_export]
macro_rules! relq_trace_tx {
    ($event:literal, $level:expr) => {
        #[cfg(feature = "tracing")]
        tracing::info!(event = $event, level = $level, "relq.transaction");
    };
    ($event:literal, $level:expr, $error:expr) => {
        #[cfg(feature = "tracing")]
        tracing::warn!(event = $event, level = $level, error = %$error, "relq.transaction");
        #[cfg(not(feature = "tracing"))]
        let _ = &$error;
    };
}

/// Emit a warn-level tracing event when a lost connection is re-established.
#[macro_export]
macro_rules! relq_trace_reconnect {
    ($connection:expr, $error:expr) => {
        #[cfg(feature = "tracing")]
        tracing::warn!(connection = %$connection, error = %$error, "relq.reconnect");
    };
}

/// Emit a debug-level tracing event when a caller-supplied cursor token is
/// discarded and pagination restarts from the first page.
#[macro_export]
macro_rules! relq_trace_cursor {
    ($column:expr, $reason:expr) => {
        #[cfg(feature = "tracing")]
        tracing::debug!(column = %$column, reason = %$reason, "relq.cursor.discarded");
    };
}
