use std::collections::HashMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::backup::ColdBackup;
use crate::error::Result;

use super::store::MemoryStore;
use super::types::Role;

/// What a reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Messages found in the cold backup.
    pub examined: usize,
    /// Messages that were missing from the store and have now been embedded.
    pub appended: usize,
    /// Missing messages that could not be appended.
    pub failed: usize,
}

/// Embed backup messages that never made it into the memory store.
///
/// Messages are matched as a multiset on (role, content), so a line said
/// twice needs two records. Missing messages are appended in conversation
/// order; a failed append is counted and the pass moves on.
pub async fn reconcile(
    store: &MemoryStore,
    backup: &ColdBackup,
    username: &str,
) -> Result<ReconcileReport> {
    let Some(snapshot) = backup.load(username).await? else {
        return Ok(ReconcileReport::default());
    };

    let mut stored: HashMap<(Role, String), usize> = HashMap::new();
    for record in store.list(username).await? {
        *stored.entry((record.role, record.content)).or_default() += 1;
    }

    let mut report = ReconcileReport {
        examined: snapshot.messages.len(),
        ..Default::default()
    };

    for message in &snapshot.messages {
        if let Some(n) = stored.get_mut(&(message.role, message.content.clone())) {
            if *n > 0 {
                *n -= 1;
                continue;
            }
        }

        match store.append(username, message.role, &message.content).await {
            Ok(_) => report.appended += 1,
            Err(e) => {
                warn!(username, role = %message.role, error = %e, "reconcile append failed");
                report.failed += 1;
            }
        }
    }

    info!(
        username,
        examined = report.examined,
        appended = report.appended,
        failed = report.failed,
        "reconciled memory with cold backup"
    );
    Ok(report)
}
