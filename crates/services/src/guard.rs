use std::future::Future;
use std::time::Duration;

use domains::StoreError;

/// Runs a store call with an upper bound on how long it may take.
pub(crate) async fn bounded<T, E, F>(limit: Duration, call: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<StoreError>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit).into()),
    }
}
