//! Domain models for files, vectors, queue jobs, and verification tasks.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::error::{Error, Result};

// =============================================================================
// FILE (external, read-only)
// =============================================================================

/// Lifecycle status of a hosted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Normal,
    PendingDeletion,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Normal => "normal",
            FileStatus::PendingDeletion => "pending_deletion",
        }
    }
}

impl FromStr for FileStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "normal" => Ok(FileStatus::Normal),
            "pending_deletion" => Ok(FileStatus::PendingDeletion),
            other => Err(Error::InvalidInput(format!("unknown file status: {other}"))),
        }
    }
}

/// Visibility of a hosted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Public,
    Private,
    Protected,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Public => "public",
            AccessLevel::Private => "private",
            AccessLevel::Protected => "protected",
        }
    }
}

impl FromStr for AccessLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "public" => Ok(AccessLevel::Public),
            "private" => Ok(AccessLevel::Private),
            "protected" => Ok(AccessLevel::Protected),
            other => Err(Error::InvalidInput(format!("unknown access level: {other}"))),
        }
    }
}

/// A hosted file row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub user_id: i64,
    /// Set when this file is a near-duplicate of another.
    pub original_file_id: Option<String>,
    pub status: FileStatus,
    pub access_level: AccessLevel,
    pub is_recommended: bool,
}

impl FileRecord {
    /// Whether the file may appear in the given search scope.
    pub fn visible_in(&self, scope: &SearchScope) -> bool {
        if self.status == FileStatus::PendingDeletion {
            return false;
        }
        match scope {
            SearchScope::Public => self.access_level == AccessLevel::Public && self.is_recommended,
            SearchScope::User(user_id) => self.user_id == *user_id,
            SearchScope::Admin => true,
        }
    }
}

/// AI-generated description attached to a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAiInfo {
    pub file_id: String,
    /// Canonical text that gets embedded.
    pub description: String,
    pub search_content: String,
}

// =============================================================================
// FILE VECTOR (owned)
// =============================================================================

/// Pipeline status of a `file_vector` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Reset,
    Stale,
}

impl VectorStatus {
    pub const ALL: [VectorStatus; 6] = [
        VectorStatus::Pending,
        VectorStatus::Processing,
        VectorStatus::Completed,
        VectorStatus::Failed,
        VectorStatus::Reset,
        VectorStatus::Stale,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VectorStatus::Pending => "pending",
            VectorStatus::Processing => "processing",
            VectorStatus::Completed => "completed",
            VectorStatus::Failed => "failed",
            VectorStatus::Reset => "reset",
            VectorStatus::Stale => "stale",
        }
    }

    /// Whether a row in this status may be enqueued without further checks.
    pub fn is_enqueueable(&self) -> bool {
        matches!(self, VectorStatus::Pending | VectorStatus::Reset)
    }
}

impl fmt::Display for VectorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VectorStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(VectorStatus::Pending),
            // Legacy rows written with an undeclared `running` label.
            "processing" | "running" => Ok(VectorStatus::Processing),
            "completed" => Ok(VectorStatus::Completed),
            "failed" => Ok(VectorStatus::Failed),
            "reset" => Ok(VectorStatus::Reset),
            "stale" => Ok(VectorStatus::Stale),
            other => Err(Error::InvalidInput(format!("unknown vector status: {other}"))),
        }
    }
}

/// Vector-store presence as last observed by verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActualStatus {
    Unknown,
    Verified,
    Missing,
}

impl ActualStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActualStatus::Unknown => "unknown",
            ActualStatus::Verified => "verified",
            ActualStatus::Missing => "missing",
        }
    }
}

impl fmt::Display for ActualStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActualStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "unknown" | "" => Ok(ActualStatus::Unknown),
            "verified" => Ok(ActualStatus::Verified),
            "missing" => Ok(ActualStatus::Missing),
            other => Err(Error::InvalidInput(format!("unknown actual status: {other}"))),
        }
    }
}

/// One `file_vector` row; 1:1 with `file`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileVector {
    pub file_id: String,
    pub description: String,
    pub model: String,
    pub dimension: i32,
    pub status: VectorStatus,
    pub actual_status: ActualStatus,
    pub retry_count: i32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub last_verified: Option<DateTime<Utc>>,
    pub verification_error: String,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileVector {
    /// A fresh `pending` row.
    pub fn pending(file_id: &str, description: &str, model: &str, dimension: i32) -> Self {
        let now = Utc::now();
        Self {
            file_id: file_id.to_string(),
            description: description.to_string(),
            model: model.to_string(),
            dimension,
            status: VectorStatus::Pending,
            actual_status: ActualStatus::Unknown,
            retry_count: 0,
            last_retry_at: None,
            last_verified: None,
            verification_error: String::new(),
            error_message: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Row selected by the missing-vector reconciliation sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileCandidate {
    pub file_id: String,
    pub description: String,
    /// False when no `file_vector` row exists yet.
    pub has_vector: bool,
}

/// Counts of `file_vector` rows per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub reset: i64,
    pub stale: i64,
    pub verified: i64,
    pub missing: i64,
    pub unknown: i64,
}

impl StatusCounts {
    /// Add one row to the tallies.
    pub fn add(&mut self, status: VectorStatus, actual: ActualStatus) {
        self.add_n(status, actual, 1);
    }

    /// Count `n` rows sharing one `(status, actual_status)` pair.
    pub fn add_n(&mut self, status: VectorStatus, actual: ActualStatus, n: i64) {
        self.total += n;
        match status {
            VectorStatus::Pending => self.pending += n,
            VectorStatus::Processing => self.processing += n,
            VectorStatus::Completed => self.completed += n,
            VectorStatus::Failed => self.failed += n,
            VectorStatus::Reset => self.reset += n,
            VectorStatus::Stale => self.stale += n,
        }
        match actual {
            ActualStatus::Verified => self.verified += n,
            ActualStatus::Missing => self.missing += n,
            ActualStatus::Unknown => self.unknown += n,
        }
    }
}

// =============================================================================
// QUEUE
// =============================================================================

/// Status of a `vector_job` row (database queue backend).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::InvalidInput(format!("unknown job status: {other}"))),
        }
    }
}

/// A time-bounded exclusive claim on a queued file id.
///
/// The token identifies this particular delivery; acknowledging with a token
/// whose lease has been reaped is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub file_id: String,
    /// Previous failed or expired deliveries of this job.
    pub attempts: i32,
    pub token: Uuid,
    pub lease_until: DateTime<Utc>,
}

/// Point-in-time queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetrics {
    /// Due jobs awaiting pickup.
    pub queued: i64,
    /// Jobs currently leased.
    pub in_flight: i64,
    /// Jobs scheduled for the future.
    pub delayed: i64,
    /// Dead-lettered jobs.
    pub dlq: i64,
}

// =============================================================================
// VERIFICATION
// =============================================================================

/// How a verification task was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Manual,
    Scheduled,
    Partial,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Manual => "manual",
            TaskType::Scheduled => "scheduled",
            TaskType::Partial => "partial",
        }
    }
}

impl FromStr for TaskType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "manual" => Ok(TaskType::Manual),
            "scheduled" => Ok(TaskType::Scheduled),
            "partial" => Ok(TaskType::Partial),
            other => Err(Error::InvalidInput(format!("unknown task type: {other}"))),
        }
    }
}

/// Lifecycle of a verification task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(Error::InvalidInput(format!("unknown task status: {other}"))),
        }
    }
}

/// Row selection for a verification task.
///
/// Persisted as `filter_conditions` JSON in one of these shapes:
/// `{"file_ids": [..]}`, `{"force_full_check": true}`,
/// `{"needs_verification": true}`, `{"actual_status": "missing"}`.
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationFilter {
    /// Exactly these ids (partial task).
    FileIds(Vec<String>),
    /// Every `completed` row.
    ForceFullCheck,
    /// Completed rows, unknown/missing labels, or not verified within 24 h.
    NeedsVerification,
    /// Rows currently carrying this label.
    ActualStatus(ActualStatus),
}

impl VerificationFilter {
    pub fn to_json(&self) -> JsonValue {
        match self {
            VerificationFilter::FileIds(ids) => json!({ "file_ids": ids }),
            VerificationFilter::ForceFullCheck => json!({ "force_full_check": true }),
            VerificationFilter::NeedsVerification => json!({ "needs_verification": true }),
            VerificationFilter::ActualStatus(s) => json!({ "actual_status": s.as_str() }),
        }
    }

    pub fn from_json(value: &JsonValue) -> Result<Self> {
        if let Some(ids) = value.get("file_ids") {
            let ids: Vec<String> = serde_json::from_value(ids.clone())?;
            return Ok(VerificationFilter::FileIds(ids));
        }
        if value.get("force_full_check").and_then(JsonValue::as_bool) == Some(true) {
            return Ok(VerificationFilter::ForceFullCheck);
        }
        if value.get("needs_verification").and_then(JsonValue::as_bool) == Some(true) {
            return Ok(VerificationFilter::NeedsVerification);
        }
        if let Some(s) = value.get("actual_status").and_then(JsonValue::as_str) {
            return Ok(VerificationFilter::ActualStatus(s.parse()?));
        }
        Err(Error::InvalidInput(format!(
            "unsupported filter_conditions: {value}"
        )))
    }

    /// Task type implied by the filter when the caller does not choose one.
    pub fn default_task_type(&self) -> TaskType {
        match self {
            VerificationFilter::FileIds(_) => TaskType::Partial,
            _ => TaskType::Manual,
        }
    }

    /// In-memory predicate equivalent to the SQL selection.
    pub fn matches(&self, row: &FileVector, now: DateTime<Utc>) -> bool {
        match self {
            VerificationFilter::FileIds(ids) => ids.iter().any(|id| id == &row.file_id),
            VerificationFilter::ForceFullCheck => row.status == VectorStatus::Completed,
            VerificationFilter::NeedsVerification => {
                let stale_before =
                    now - chrono::Duration::hours(crate::defaults::VERIFY_STALE_AFTER_HOURS);
                row.status == VectorStatus::Completed
                    || matches!(
                        row.actual_status,
                        ActualStatus::Unknown | ActualStatus::Missing
                    )
                    || row.last_verified.map_or(true, |t| t < stale_before)
            }
            VerificationFilter::ActualStatus(s) => row.actual_status == *s,
        }
    }
}

/// A `vector_verification_task` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationTask {
    pub task_id: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub creator_id: Option<i64>,
    pub filter_conditions: JsonValue,
    pub total_count: i64,
    pub processed_count: i64,
    pub verified_count: i64,
    pub missing_count: i64,
    pub error_count: i64,
    pub batch_size: i32,
    pub error_message: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl VerificationTask {
    /// Completion percentage for progress reporting.
    pub fn progress_percent(&self) -> f64 {
        if self.total_count <= 0 {
            return if self.status == TaskStatus::Completed {
                100.0
            } else {
                0.0
            };
        }
        (self.processed_count as f64 / self.total_count as f64 * 100.0).min(100.0)
    }
}

/// Cumulative counters persisted after each verification batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub processed: i64,
    pub verified: i64,
    pub missing: i64,
    pub errors: i64,
}

/// Keyset cursor over `file_vector` ordered by `(created_at, file_id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyCursor {
    pub created_at: DateTime<Utc>,
    pub file_id: String,
}

// =============================================================================
// PROCESSING LOG
// =============================================================================

/// Action recorded in `vector_processing_log`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    Store,
    Retry,
    Reset,
    Delete,
    RecoverStuck,
    Verify,
}

impl LogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogAction::Store => "store",
            LogAction::Retry => "retry",
            LogAction::Reset => "reset",
            LogAction::Delete => "delete",
            LogAction::RecoverStuck => "recover_stuck",
            LogAction::Verify => "verify",
        }
    }
}

impl FromStr for LogAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "store" => Ok(LogAction::Store),
            "retry" => Ok(LogAction::Retry),
            "reset" => Ok(LogAction::Reset),
            "delete" => Ok(LogAction::Delete),
            "recover_stuck" => Ok(LogAction::RecoverStuck),
            "verify" => Ok(LogAction::Verify),
            other => Err(Error::InvalidInput(format!("unknown log action: {other}"))),
        }
    }
}

/// Append-only processing log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingLogEntry {
    pub file_id: String,
    pub action: LogAction,
    /// Free-form sub-type, e.g. `"worker"`, `"duplicate"`, `"admin"`.
    pub log_type: String,
    pub data: JsonValue,
    pub model: String,
    pub duration_ms: i64,
    pub error_code: String,
    pub task_id: String,
}

impl ProcessingLogEntry {
    pub fn new(file_id: impl Into<String>, action: LogAction, log_type: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            action,
            log_type: log_type.into(),
            data: JsonValue::Null,
            model: String::new(),
            duration_ms: 0,
            error_code: String::new(),
            task_id: String::new(),
        }
    }

    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.data = data;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_duration_ms(mut self, ms: i64) -> Self {
        self.duration_ms = ms;
        self
    }

    pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = code.into();
        self
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }
}

// =============================================================================
// VECTOR STORE
// =============================================================================

/// Payload stored beside each point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorPayload {
    pub file_id: String,
    pub description: String,
    pub model: String,
    pub user_id: i64,
}

/// A point read back from the vector store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPoint {
    pub vector: Vec<f32>,
    pub payload: VectorPayload,
}

/// A similarity hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub file_id: String,
    pub score: f32,
}

// =============================================================================
// SEARCH
// =============================================================================

/// Access-level filter applied while hydrating search hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "user_id")]
pub enum SearchScope {
    /// Public and recommended files only.
    Public,
    /// Files owned by this user.
    User(i64),
    /// Any file not pending deletion.
    Admin,
}

impl SearchScope {
    /// User id passed to the vector store as an exact-match payload filter (0 = none).
    pub fn vector_filter_user(&self) -> i64 {
        match self {
            SearchScope::User(id) => *id,
            _ => 0,
        }
    }
}
