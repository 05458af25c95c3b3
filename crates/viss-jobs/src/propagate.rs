//! Vector reuse for near-duplicate files.
//!
//! When a file completes, every live file whose `original_file_id` points at
//! it receives a copy of the stored point without another embedding call.
//! Failures are logged per duplicate and never fail the parent job.

use std::time::Instant;

use serde_json::json;
use tracing::{debug, info, warn};

use viss_core::{LogAction, ProcessingLogEntry, Result, VectorPayload, VectorStatus};

use crate::context::EngineContext;

/// Copy the point of `parent_id` to each duplicate that is not yet completed.
///
/// Returns the number of duplicates written.
pub async fn propagate_to_duplicates(ctx: &EngineContext, parent_id: &str) -> Result<usize> {
    let duplicates = ctx.stores.files.list_duplicates(parent_id).await?;
    if duplicates.is_empty() {
        return Ok(0);
    }

    let Some(point) = ctx.vector_store.fetch(parent_id).await? else {
        warn!(
            subsystem = "worker",
            component = "propagate",
            file_id = parent_id,
            "Parent point missing, duplicates left for their own jobs"
        );
        return Ok(0);
    };
    let dimension = i32::try_from(point.vector.len()).unwrap_or(i32::MAX);

    let mut written = 0;
    for dup in duplicates {
        let start = Instant::now();
        match ctx.stores.vectors.get(&dup.id).await {
            Ok(Some(row)) if row.status == VectorStatus::Completed => {
                debug!(
                    subsystem = "worker",
                    component = "propagate",
                    file_id = %dup.id,
                    "Duplicate already completed"
                );
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    subsystem = "worker",
                    component = "propagate",
                    file_id = %dup.id,
                    error = %e,
                    "Duplicate lookup failed"
                );
                continue;
            }
        }

        let payload = VectorPayload {
            file_id: dup.id.clone(),
            description: point.payload.description.clone(),
            model: point.payload.model.clone(),
            user_id: dup.user_id,
        };

        let outcome = async {
            ctx.vector_store
                .upsert(&dup.id, &point.vector, &payload)
                .await?;
            ctx.stores
                .vectors
                .mark_completed(&dup.id, &payload.description, &payload.model, dimension)
                .await
        }
        .await;

        match outcome {
            Ok(()) => {
                written += 1;
                ctx.log(
                    ProcessingLogEntry::new(&dup.id, LogAction::Store, "duplicate")
                        .with_model(&payload.model)
                        .with_duration_ms(start.elapsed().as_millis() as i64)
                        .with_data(json!({ "original_file_id": parent_id })),
                )
                .await;
            }
            Err(e) => {
                warn!(
                    subsystem = "worker",
                    component = "propagate",
                    file_id = %dup.id,
                    original_file_id = parent_id,
                    error = %e,
                    "Duplicate propagation failed"
                );
            }
        }
    }

    if written > 0 {
        info!(
            subsystem = "worker",
            component = "propagate",
            file_id = parent_id,
            written,
            "Vector propagated to duplicates"
        );
    }
    Ok(written)
}
