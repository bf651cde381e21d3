//! The per-user collection plan.

use crate::error::EngineResult;
use ledgerlock_crypto::{repayments_path, user_collection_paths};
use ledgerlock_storage::RecordStore;

const DISCOVERY_PAGE: usize = 50;

/// Every collection holding encryptable records for a user: the static
/// top-level set plus a repayments subcollection per discovered loan.
pub(crate) async fn collection_plan(
    store: &dyn RecordStore,
    user_id: &str,
) -> EngineResult<Vec<String>> {
    let mut paths = user_collection_paths(user_id);

    let loans_path = format!("users/{user_id}/loans");
    let mut cursor: Option<String> = None;
    loop {
        let page = store
            .list(&loans_path, cursor.as_deref(), DISCOVERY_PAGE)
            .await?;
        if page.is_empty() {
            break;
        }
        cursor = Some(page.last().map(|r| r.id.clone()).unwrap_or_default());
        for loan in &page {
            paths.push(repayments_path(user_id, &loan.id));
        }
        if page.len() < DISCOVERY_PAGE {
            break;
        }
    }

    Ok(paths)
}
