//! Structured logging field names shared by every crate.
//!
//! Log aggregation tools query by these names, so crates pass them as
//! `tracing` field keys rather than inventing their own.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue (retry scheduled, propagation failed) |
//! | INFO  | Lifecycle events, sweep summaries |
//! | DEBUG | Decision points, config choices |
//! | TRACE | Per-item iteration (search hits, verified rows) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the event.
/// Values: "database", "queue", "embedding", "vector_store", "worker",
/// "reconcile", "verification", "search", "engine", "scheduler"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem, e.g. "redis", "pool", "reaper".
pub const COMPONENT: &str = "component";

/// Logical operation name, e.g. "fetch", "reconcile_missing".
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// File id being processed.
pub const FILE_ID: &str = "file_id";

/// Verification task id.
pub const TASK_ID: &str = "task_id";

/// Worker slot index.
pub const WORKER: &str = "worker";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Delivery attempt number.
pub const ATTEMPT: &str = "attempt";

/// Number of results returned by a search or sweep.
pub const RESULT_COUNT: &str = "result_count";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Short error classification, see `Error::code`.
pub const ERROR_CODE: &str = "error_code";
