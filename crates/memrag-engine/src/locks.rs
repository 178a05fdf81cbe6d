use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Mutex as AsyncMutex;

/// One async mutex per tenant: writes against the same tenant serialize,
/// writes against different tenants never block each other. Reads bypass
/// these locks entirely (LanceDB serves snapshot reads).
#[derive(Default)]
pub(crate) struct TenantLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl TenantLocks {
    pub(crate) fn for_tenant(&self, tenant: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.entry(tenant.to_string()).or_default().clone()
    }
}
