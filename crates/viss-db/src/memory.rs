//! In-memory metadata store.
//!
//! Implements every repository trait with the same observable semantics as
//! the PostgreSQL repositories, so engine tests run without a database.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use viss_core::{
    ActualStatus, ConfigStore, Error, FileAiInfo, FileRecord, FileRepository, FileStatus,
    FileVector, FileVectorRepository, MetadataStores, ProcessingLogEntry, ProcessingLogRepository,
    ReconcileCandidate, Result, SearchScope, StatusCounts, TaskProgress, TaskStatus, VectorStatus,
    VerificationFilter, VerificationTask, VerificationTaskRepository, VerifyCursor,
};

#[derive(Default)]
struct MemoryState {
    files: BTreeMap<String, FileRecord>,
    ai_info: BTreeMap<String, FileAiInfo>,
    vectors: BTreeMap<String, FileVector>,
    tasks: BTreeMap<String, VerificationTask>,
    logs: Vec<ProcessingLogEntry>,
    config: BTreeMap<(String, String), JsonValue>,
}

impl MemoryState {
    /// Vector rows in `(created_at, file_id)` order.
    fn vectors_ordered(&self) -> Vec<&FileVector> {
        let mut rows: Vec<&FileVector> = self.vectors.values().collect();
        rows.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.file_id.cmp(&b.file_id))
        });
        rows
    }

    fn update_vector<F>(&mut self, file_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut FileVector),
    {
        match self.vectors.get_mut(file_id) {
            Some(row) => {
                f(row);
                true
            }
            None => false,
        }
    }
}

/// Shared in-memory metadata store. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bundle this store as every metadata repository.
    pub fn stores(&self) -> MetadataStores {
        MetadataStores {
            files: Arc::new(self.clone()),
            vectors: Arc::new(self.clone()),
            tasks: Arc::new(self.clone()),
            logs: Arc::new(self.clone()),
            config: Arc::new(self.clone()),
        }
    }

    /// Insert or replace a file row.
    pub fn insert_file(&self, file: FileRecord) {
        self.lock().files.insert(file.id.clone(), file);
    }

    /// Set the AI description of a file.
    pub fn set_description(&self, file_id: &str, description: &str) {
        self.lock().ai_info.insert(
            file_id.to_string(),
            FileAiInfo {
                file_id: file_id.to_string(),
                description: description.to_string(),
                search_content: String::new(),
            },
        );
    }

    /// Insert or replace a vector row as-is.
    pub fn insert_vector(&self, row: FileVector) {
        self.lock().vectors.insert(row.file_id.clone(), row);
    }

    /// Snapshot of a vector row.
    pub fn vector(&self, file_id: &str) -> Option<FileVector> {
        self.lock().vectors.get(file_id).cloned()
    }

    /// Every log entry in append order.
    pub fn logs(&self) -> Vec<ProcessingLogEntry> {
        self.lock().logs.clone()
    }
}

#[async_trait]
impl FileRepository for MemoryDatabase {
    async fn get_file(&self, file_id: &str) -> Result<Option<FileRecord>> {
        Ok(self.lock().files.get(file_id).cloned())
    }

    async fn get_ai_info(&self, file_id: &str) -> Result<Option<FileAiInfo>> {
        Ok(self.lock().ai_info.get(file_id).cloned())
    }

    async fn list_duplicates(&self, original_id: &str) -> Result<Vec<FileRecord>> {
        Ok(self
            .lock()
            .files
            .values()
            .filter(|f| {
                f.original_file_id.as_deref() == Some(original_id)
                    && f.status != FileStatus::PendingDeletion
            })
            .cloned()
            .collect())
    }

    async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        let state = self.lock();
        Ok(ids
            .iter()
            .filter(|id| state.files.contains_key(*id))
            .cloned()
            .collect())
    }

    async fn hydrate(&self, ids: &[String], scope: &SearchScope) -> Result<Vec<FileRecord>> {
        let state = self.lock();
        Ok(ids
            .iter()
            .filter_map(|id| state.files.get(id))
            .filter(|f| f.visible_in(scope))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl FileVectorRepository for MemoryDatabase {
    async fn get(&self, file_id: &str) -> Result<Option<FileVector>> {
        Ok(self.vector(file_id))
    }

    async fn ensure_pending(
        &self,
        file_id: &str,
        description: &str,
        model: &str,
        dimension: i32,
    ) -> Result<bool> {
        let mut state = self.lock();
        if state.vectors.contains_key(file_id) {
            return Ok(false);
        }
        state.vectors.insert(
            file_id.to_string(),
            FileVector::pending(file_id, description, model, dimension),
        );
        Ok(true)
    }

    async fn mark_processing(&self, file_id: &str) -> Result<()> {
        self.lock().update_vector(file_id, |row| {
            row.status = VectorStatus::Processing;
            row.error_message.clear();
            row.updated_at = Utc::now();
        });
        Ok(())
    }

    async fn mark_completed(
        &self,
        file_id: &str,
        description: &str,
        model: &str,
        dimension: i32,
    ) -> Result<()> {
        let mut state = self.lock();
        let row = state
            .vectors
            .entry(file_id.to_string())
            .or_insert_with(|| FileVector::pending(file_id, description, model, dimension));
        row.status = VectorStatus::Completed;
        row.retry_count = 0;
        row.error_message.clear();
        row.description = description.to_string();
        row.model = model.to_string();
        row.dimension = dimension;
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn increment_retry(&self, file_id: &str, max: i32) -> Result<i32> {
        let mut state = self.lock();
        let row = state
            .vectors
            .get_mut(file_id)
            .ok_or_else(|| Error::NotFound(format!("file_vector {file_id}")))?;
        let now = Utc::now();
        row.retry_count = (row.retry_count + 1).min(max);
        row.last_retry_at = Some(now);
        row.updated_at = now;
        Ok(row.retry_count)
    }

    async fn mark_pending(&self, file_id: &str, error_message: &str) -> Result<()> {
        self.lock().update_vector(file_id, |row| {
            row.status = VectorStatus::Pending;
            row.error_message = error_message.to_string();
            row.updated_at = Utc::now();
        });
        Ok(())
    }

    async fn mark_failed(&self, file_id: &str, error_message: &str) -> Result<()> {
        self.lock().update_vector(file_id, |row| {
            row.status = VectorStatus::Failed;
            row.error_message = error_message.to_string();
            row.updated_at = Utc::now();
        });
        Ok(())
    }

    async fn list_enqueueable(&self, limit: i64, max_retries: i32) -> Result<Vec<String>> {
        let state = self.lock();
        Ok(state
            .vectors_ordered()
            .into_iter()
            .filter(|row| {
                row.status.is_enqueueable()
                    || (row.status == VectorStatus::Failed && row.retry_count < max_retries)
            })
            .take(limit.max(0) as usize)
            .map(|row| row.file_id.clone())
            .collect())
    }

    async fn list_ids_by_status(&self, status: VectorStatus, limit: i64) -> Result<Vec<String>> {
        let state = self.lock();
        Ok(state
            .vectors_ordered()
            .into_iter()
            .filter(|row| row.status == status)
            .take(limit.max(0) as usize)
            .map(|row| row.file_id.clone())
            .collect())
    }

    async fn reconcile_candidates(
        &self,
        after: Option<&str>,
        limit: i64,
        max_retries: i32,
    ) -> Result<Vec<ReconcileCandidate>> {
        let state = self.lock();
        Ok(state
            .ai_info
            .values()
            .filter(|info| after.map_or(true, |a| info.file_id.as_str() > a))
            .filter(|info| !info.description.is_empty())
            .filter(|info| {
                state
                    .files
                    .get(&info.file_id)
                    .map_or(true, |f| f.status != FileStatus::PendingDeletion)
            })
            .filter_map(|info| match state.vectors.get(&info.file_id) {
                None => Some(ReconcileCandidate {
                    file_id: info.file_id.clone(),
                    description: info.description.clone(),
                    has_vector: false,
                }),
                Some(row)
                    if matches!(
                        row.status,
                        VectorStatus::Pending | VectorStatus::Reset | VectorStatus::Stale
                    ) || (row.status == VectorStatus::Failed
                        && row.retry_count < max_retries) =>
                {
                    Some(ReconcileCandidate {
                        file_id: info.file_id.clone(),
                        description: info.description.clone(),
                        has_vector: true,
                    })
                }
                Some(_) => None,
            })
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count_for_verification(&self, filter: &VerificationFilter) -> Result<i64> {
        let now = Utc::now();
        Ok(self
            .lock()
            .vectors
            .values()
            .filter(|row| filter.matches(row, now))
            .count() as i64)
    }

    async fn list_for_verification(
        &self,
        filter: &VerificationFilter,
        after: Option<&VerifyCursor>,
        limit: i64,
    ) -> Result<Vec<FileVector>> {
        let now = Utc::now();
        let state = self.lock();
        Ok(state
            .vectors_ordered()
            .into_iter()
            .filter(|row| match after {
                Some(c) => (row.created_at, row.file_id.as_str()) > (c.created_at, c.file_id.as_str()),
                None => true,
            })
            .filter(|row| filter.matches(row, now))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn record_verification(
        &self,
        file_id: &str,
        actual: ActualStatus,
        error: &str,
    ) -> Result<()> {
        self.lock().update_vector(file_id, |row| {
            row.actual_status = actual;
            row.verification_error = error.to_string();
            row.last_verified = Some(Utc::now());
        });
        Ok(())
    }

    async fn reset_for_repair(&self, file_id: &str) -> Result<bool> {
        Ok(self.lock().update_vector(file_id, |row| {
            row.status = VectorStatus::Pending;
            row.actual_status = ActualStatus::Unknown;
            row.verification_error.clear();
            row.retry_count = 0;
            row.error_message.clear();
            row.updated_at = Utc::now();
        }))
    }

    async fn list_problem_ids(&self, include_unknown: bool, limit: i64) -> Result<Vec<String>> {
        let state = self.lock();
        Ok(state
            .vectors_ordered()
            .into_iter()
            .filter(|row| row.status == VectorStatus::Completed)
            .filter(|row| match row.actual_status {
                ActualStatus::Missing => true,
                ActualStatus::Unknown => include_unknown,
                ActualStatus::Verified => false,
            })
            .take(limit.max(0) as usize)
            .map(|row| row.file_id.clone())
            .collect())
    }

    async fn reset_retry(&self, file_id: &str) -> Result<bool> {
        Ok(self.lock().update_vector(file_id, |row| {
            row.status = VectorStatus::Pending;
            row.retry_count = 0;
            row.error_message.clear();
            row.updated_at = Utc::now();
        }))
    }

    async fn reset_all(&self) -> Result<u64> {
        let mut state = self.lock();
        let now = Utc::now();
        for row in state.vectors.values_mut() {
            row.status = VectorStatus::Reset;
            row.retry_count = 0;
            row.error_message.clear();
            row.actual_status = ActualStatus::Unknown;
            row.verification_error.clear();
            row.updated_at = now;
        }
        Ok(state.vectors.len() as u64)
    }

    async fn recover_stuck(&self, before: DateTime<Utc>) -> Result<Vec<String>> {
        let mut state = self.lock();
        let now = Utc::now();
        let mut recovered = Vec::new();
        for row in state.vectors.values_mut() {
            if row.status == VectorStatus::Processing && row.updated_at < before {
                row.status = VectorStatus::Pending;
                row.updated_at = now;
                recovered.push(row.file_id.clone());
            }
        }
        Ok(recovered)
    }

    async fn delete(&self, file_id: &str) -> Result<bool> {
        Ok(self.lock().vectors.remove(file_id).is_some())
    }

    async fn status_counts(&self) -> Result<StatusCounts> {
        let mut counts = StatusCounts::default();
        for row in self.lock().vectors.values() {
            counts.add(row.status, row.actual_status);
        }
        Ok(counts)
    }
}

#[async_trait]
impl VerificationTaskRepository for MemoryDatabase {
    async fn create(&self, task: &VerificationTask) -> Result<()> {
        let mut state = self.lock();
        if state.tasks.contains_key(&task.task_id) {
            return Err(Error::Conflict(format!(
                "verification task {} already exists",
                task.task_id
            )));
        }
        state.tasks.insert(task.task_id.clone(), task.clone());
        Ok(())
    }

    async fn get(&self, task_id: &str) -> Result<Option<VerificationTask>> {
        Ok(self.lock().tasks.get(task_id).cloned())
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<VerificationTask>> {
        let state = self.lock();
        let mut tasks: Vec<&VerificationTask> = state.tasks.values().collect();
        tasks.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.task_id.cmp(&a.task_id))
        });
        Ok(tasks
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn find_running(&self) -> Result<Option<VerificationTask>> {
        Ok(self
            .lock()
            .tasks
            .values()
            .find(|t| t.status == TaskStatus::Running)
            .cloned())
    }

    async fn mark_running(&self, task_id: &str) -> Result<()> {
        let mut state = self.lock();
        if state
            .tasks
            .values()
            .any(|t| t.status == TaskStatus::Running && t.task_id != task_id)
        {
            return Err(Error::Conflict(
                "a verification task is already running".to_string(),
            ));
        }
        match state.tasks.get_mut(task_id) {
            Some(task) if task.status == TaskStatus::Pending => {
                task.status = TaskStatus::Running;
                task.started_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(Error::Conflict(format!(
                "verification task {task_id} is not pending"
            ))),
        }
    }

    async fn update_progress(&self, task_id: &str, progress: &TaskProgress) -> Result<()> {
        if let Some(task) = self.lock().tasks.get_mut(task_id) {
            task.processed_count = progress.processed;
            task.verified_count = progress.verified;
            task.missing_count = progress.missing;
            task.error_count = progress.errors;
        }
        Ok(())
    }

    async fn finish(
        &self,
        task_id: &str,
        status: TaskStatus,
        error_message: &str,
        progress: &TaskProgress,
    ) -> Result<()> {
        if let Some(task) = self.lock().tasks.get_mut(task_id) {
            task.status = status;
            task.error_message = error_message.to_string();
            task.processed_count = progress.processed;
            task.verified_count = progress.verified;
            task.missing_count = progress.missing;
            task.error_count = progress.errors;
            task.completed_at = Some(Utc::now());
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessingLogRepository for MemoryDatabase {
    async fn append(&self, entry: &ProcessingLogEntry) -> Result<()> {
        self.lock().logs.push(entry.clone());
        Ok(())
    }

    async fn list_for_file(&self, file_id: &str, limit: i64) -> Result<Vec<ProcessingLogEntry>> {
        Ok(self
            .lock()
            .logs
            .iter()
            .rev()
            .filter(|e| e.file_id == file_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ConfigStore for MemoryDatabase {
    async fn load_group(&self, group: &str) -> Result<Vec<(String, JsonValue)>> {
        Ok(self
            .lock()
            .config
            .iter()
            .filter(|((g, _), _)| g == group)
            .map(|((_, k), v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn save(&self, group: &str, key: &str, value: &JsonValue) -> Result<()> {
        self.lock()
            .config
            .insert((group.to_string(), key.to_string()), value.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use viss_core::AccessLevel;

    fn file(id: &str, user_id: i64, original: Option<&str>) -> FileRecord {
        FileRecord {
            id: id.to_string(),
            user_id,
            original_file_id: original.map(str::to_string),
            status: FileStatus::Normal,
            access_level: AccessLevel::Private,
            is_recommended: false,
        }
    }

    #[tokio::test]
    async fn test_ensure_pending_is_idempotent() {
        let db = MemoryDatabase::new();
        assert!(db.ensure_pending("a", "cat", "m", 1536).await.unwrap());
        assert!(!db.ensure_pending("a", "dog", "m", 1536).await.unwrap());
        let row = db.vector("a").unwrap();
        assert_eq!(row.status, VectorStatus::Pending);
        assert_eq!(row.description, "cat");
    }

    #[tokio::test]
    async fn test_increment_retry_is_bounded() {
        let db = MemoryDatabase::new();
        db.ensure_pending("a", "cat", "m", 1536).await.unwrap();
        for _ in 0..5 {
            db.increment_retry("a", 3).await.unwrap();
        }
        assert_eq!(db.vector("a").unwrap().retry_count, 3);
        assert!(db.increment_retry("missing", 3).await.is_err());
    }

    #[tokio::test]
    async fn test_enqueueable_excludes_exhausted_failures() {
        let db = MemoryDatabase::new();
        for id in ["a", "b", "c", "d"] {
            db.ensure_pending(id, "x", "m", 1536).await.unwrap();
        }
        db.mark_failed("b", "boom").await.unwrap();
        db.mark_failed("c", "boom").await.unwrap();
        for _ in 0..3 {
            db.increment_retry("c", 3).await.unwrap();
        }
        db.mark_completed("d", "x", "m", 1536).await.unwrap();

        let ids = db.list_enqueueable(10, 3).await.unwrap();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_reconcile_candidates() {
        let db = MemoryDatabase::new();
        db.insert_file(file("a", 1, None));
        db.insert_file(file("b", 1, None));
        let mut deleted = file("c", 1, None);
        deleted.status = FileStatus::PendingDeletion;
        db.insert_file(deleted);
        db.set_description("a", "a cat");
        db.set_description("b", "a dog");
        db.set_description("c", "a bird");
        db.set_description("e", "");
        db.mark_completed("b", "a dog", "m", 1536).await.unwrap();

        let candidates = db.reconcile_candidates(None, 10, 3).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].file_id, "a");
        assert!(!candidates[0].has_vector);

        assert!(db.reconcile_candidates(Some("a"), 10, 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicates_exclude_pending_deletion() {
        let db = MemoryDatabase::new();
        db.insert_file(file("p", 1, None));
        db.insert_file(file("d1", 2, Some("p")));
        let mut d2 = file("d2", 3, Some("p"));
        d2.status = FileStatus::PendingDeletion;
        db.insert_file(d2);

        let dups = db.list_duplicates("p").await.unwrap();
        assert_eq!(dups.len(), 1);
        assert_eq!(dups[0].id, "d1");
    }

    #[tokio::test]
    async fn test_recover_stuck_respects_threshold() {
        let db = MemoryDatabase::new();
        let mut old = FileVector::pending("old", "x", "m", 1536);
        old.status = VectorStatus::Processing;
        old.updated_at = Utc::now() - chrono::Duration::minutes(30);
        db.insert_vector(old);
        db.ensure_pending("fresh", "x", "m", 1536).await.unwrap();
        db.mark_processing("fresh").await.unwrap();

        let recovered = db
            .recover_stuck(Utc::now() - chrono::Duration::minutes(10))
            .await
            .unwrap();
        assert_eq!(recovered, vec!["old".to_string()]);
        assert_eq!(db.vector("old").unwrap().status, VectorStatus::Pending);
        assert_eq!(db.vector("fresh").unwrap().status, VectorStatus::Processing);
    }

    #[tokio::test]
    async fn test_verification_keyset_pagination() {
        let db = MemoryDatabase::new();
        let base = Utc::now();
        for (i, id) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            let mut row = FileVector::pending(id, "x", "m", 1536);
            row.status = VectorStatus::Completed;
            row.created_at = base + chrono::Duration::seconds(i as i64);
            db.insert_vector(row);
        }
        let filter = VerificationFilter::ForceFullCheck;
        assert_eq!(db.count_for_verification(&filter).await.unwrap(), 5);

        let first = db.list_for_verification(&filter, None, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        let last = first.last().unwrap();
        let cursor = VerifyCursor {
            created_at: last.created_at,
            file_id: last.file_id.clone(),
        };
        let rest = db
            .list_for_verification(&filter, Some(&cursor), 10)
            .await
            .unwrap();
        let ids: Vec<_> = rest.iter().map(|r| r.file_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d", "e"]);
    }

    #[tokio::test]
    async fn test_single_running_task() {
        let db = MemoryDatabase::new();
        let now = Utc::now();
        let task = |id: &str| VerificationTask {
            task_id: id.to_string(),
            task_type: viss_core::TaskType::Manual,
            status: TaskStatus::Pending,
            creator_id: None,
            filter_conditions: VerificationFilter::ForceFullCheck.to_json(),
            total_count: 0,
            processed_count: 0,
            verified_count: 0,
            missing_count: 0,
            error_count: 0,
            batch_size: 100,
            error_message: String::new(),
            started_at: None,
            completed_at: None,
            created_at: now,
        };
        db.create(&task("t1")).await.unwrap();
        db.create(&task("t2")).await.unwrap();
        db.mark_running("t1").await.unwrap();
        assert!(matches!(
            db.mark_running("t2").await,
            Err(Error::Conflict(_))
        ));
        assert_eq!(db.find_running().await.unwrap().unwrap().task_id, "t1");
    }

    #[tokio::test]
    async fn test_config_store_round_trip() {
        let db = MemoryDatabase::new();
        db.save("vector", "vector_concurrency", &serde_json::json!(5))
            .await
            .unwrap();
        db.save("other", "x", &serde_json::json!(true)).await.unwrap();
        let group = db.load_group("vector").await.unwrap();
        assert_eq!(
            group,
            vec![("vector_concurrency".to_string(), serde_json::json!(5))]
        );
    }
}
