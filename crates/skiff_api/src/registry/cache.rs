use std::sync::Arc;
use std::time::Duration;

use tokio::{sync::{Mutex, RwLock}, task::JoinHandle};
use tracing::{debug, info, warn};

use super::{RegistryClient, RegistryError};

/// In-memory list of every repository name in the registry.
///
/// Readers get a shared snapshot. A refresh builds a whole new list and swaps it in.
#[derive(Debug, Default)]
pub struct RepositoryCache {
    snapshot: RwLock<Option<Arc<Vec<String>>>>,
    /// Serializes the initial catalog load.
    first_load: Mutex<()>,
}

impl RepositoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repositories(repositories: Vec<String>) -> Self {
        Self {
            snapshot: RwLock::new(Some(Arc::new(repositories))),
            first_load: Mutex::new(()),
        }
    }

    /// The current snapshot, `None` until the cache was populated once.
    pub async fn snapshot(&self) -> Option<Arc<Vec<String>>> {
        self.snapshot.read().await.clone()
    }

    pub async fn replace(&self, repositories: Vec<String>) -> Arc<Vec<String>> {
        let snapshot = Arc::new(repositories);
        *self.snapshot.write().await = Some(snapshot.clone());

        snapshot
    }

    /// List the registry catalog as `account` and swap the result in.
    pub async fn refresh(&self, client: &RegistryClient, account: &str) -> Result<Arc<Vec<String>>, RegistryError> {
        let repositories = client.catalog(account).await?;
        debug!("Refreshed repository cache with {} entries", repositories.len());

        Ok(self.replace(repositories).await)
    }

    /// The current snapshot, populating the cache first if it is still empty.
    pub async fn get_or_refresh(&self, client: &RegistryClient, account: &str) -> Result<Arc<Vec<String>>, RegistryError> {
        if let Some(snapshot) = self.snapshot().await {
            return Ok(snapshot);
        }

        let _guard = self.first_load.lock().await;
        match self.snapshot().await {
            Some(snapshot) => Ok(snapshot),
            None => self.refresh(client, account).await,
        }
    }
}

/// Periodically refresh `cache` from the registry catalog.
///
/// A failed refresh keeps the previous snapshot.
pub fn spawn_refresher(cache: Arc<RepositoryCache>, client: RegistryClient, account: String, interval: Duration) -> JoinHandle<()> {
    info!("Refreshing the repository cache every {}s", interval.as_secs());

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        loop {
            ticker.tick().await;

            if let Err(e) = cache.refresh(&client, &account).await {
                warn!("Failed to refresh repository cache: {}", e);
            }
        }
    })
}
