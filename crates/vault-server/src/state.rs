//! The composition root's shared state: one of each service, handed to
//! every route handler and to the MCP tool router behind an `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use auth::AuthService;
use oracle::{CancelHandle, Librarian, Oracle};
use tokio::sync::Mutex as AsyncMutex;
use tool_dispatch::ToolRegistry;
use vault_index::IndexDb;
use vault_store::VaultStore;

use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Arc<VaultStore>,
    pub index: Arc<IndexDb>,
    pub auth: Arc<AuthService>,
    pub tools: Arc<ToolRegistry>,
    pub oracle: Arc<Oracle>,
    pub librarian: Arc<Librarian>,
    /// In-flight oracle queries keyed by `(tenant, query_id)`, so a
    /// `/oracle/cancel` request can reach the right `CancelHandle`.
    pub in_flight: Arc<AsyncMutex<HashMap<String, CancelHandle>>>,
}

impl AppState {
    pub async fn register_query(&self, key: String, handle: CancelHandle) {
        self.in_flight.lock().await.insert(key, handle);
    }

    pub async fn take_cancel_handle(&self, key: &str) -> Option<CancelHandle> {
        self.in_flight.lock().await.remove(key)
    }

    pub async fn cancel_query(&self, key: &str) -> bool {
        if let Some(handle) = self.in_flight.lock().await.get(key) {
            handle.cancel();
            true
        } else {
            false
        }
    }
}
