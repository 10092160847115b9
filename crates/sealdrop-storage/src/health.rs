//! Storage health check

use opendal::Operator;

/// Verify the storage backend is reachable
pub async fn check_health(op: &Operator) -> anyhow::Result<()> {
    op.check()
        .await
        .map_err(|e| anyhow::anyhow!("storage health check failed: {e}"))
}
