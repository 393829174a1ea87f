//! Session opening and per-part target issuance.

use std::collections::BTreeMap;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::models::upload::{PartTarget, UploadRequest, UploadSession};

use super::{BackendError, PartPlan, SessionMetadata, StorageBackend, UploadError};

/// Open a backend session for `key`.
///
/// Cancellation is checked before the call but never interrupts it: once the
/// backend may have created a session the caller must own it so it can be
/// aborted.
pub async fn open_session(
    backend: &dyn StorageBackend,
    key: &str,
    request: &UploadRequest,
    plan: PartPlan,
    cancel: &CancellationToken,
) -> Result<UploadSession, UploadError> {
    if cancel.is_cancelled() {
        return Err(UploadError::Cancelled);
    }

    let metadata = SessionMetadata {
        original_name: request.file_name.clone(),
        declared_size: request.size,
    };
    let session_id = backend
        .create_session(key, &request.content_type, &metadata)
        .await
        .map_err(UploadError::SessionCreateFailed)?;
    if session_id.trim().is_empty() {
        return Err(UploadError::SessionCreateFailed(BackendError::Transport(
            "backend returned an empty session id".into(),
        )));
    }

    info!(key, session_id = %session_id, parts = plan.part_count, "opened upload session");
    Ok(UploadSession {
        session_id,
        key: key.to_string(),
        plan,
        created_at: Utc::now(),
    })
}

/// Fetch one target per part of `session`.
pub async fn issue_targets(
    backend: &dyn StorageBackend,
    session: &UploadSession,
    cancel: &CancellationToken,
) -> Result<BTreeMap<u32, PartTarget>, UploadError> {
    let part_numbers: Vec<u32> = session.plan.part_numbers().collect();

    let targets = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(UploadError::Cancelled),
        issued = backend.issue_part_targets(&session.session_id, &session.key, &part_numbers) => {
            issued.map_err(|err| {
                UploadError::IncompleteTargetSet(format!("backend did not issue targets: {}", err))
            })?
        }
    };

    let targets = validate_targets(targets, session.part_count())?;
    debug!(session_id = %session.session_id, targets = targets.len(), "issued part targets");
    Ok(targets)
}

/// Index targets by part number, requiring exactly one per part in
/// `1..=part_count`.
pub fn validate_targets(
    targets: Vec<PartTarget>,
    part_count: u32,
) -> Result<BTreeMap<u32, PartTarget>, UploadError> {
    let mut by_part = BTreeMap::new();
    for target in targets {
        let part_number = target.part_number;
        if part_number == 0 || part_number > part_count {
            return Err(UploadError::IncompleteTargetSet(format!(
                "target for unrequested part {}",
                part_number
            )));
        }
        if by_part.insert(part_number, target).is_some() {
            return Err(UploadError::IncompleteTargetSet(format!(
                "duplicate target for part {}",
                part_number
            )));
        }
    }

    if by_part.len() as u32 != part_count {
        let missing: Vec<String> = (1..=part_count)
            .filter(|n| !by_part.contains_key(n))
            .map(|n| n.to_string())
            .collect();
        return Err(UploadError::IncompleteTargetSet(format!(
            "no target for part(s) {}",
            missing.join(", ")
        )));
    }
    Ok(by_part)
}
