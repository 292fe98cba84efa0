//! Wiring of the reference backend: storage, ledger, HTTP endpoint and feed
//! server, bound from one [`ServerConfig`].

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;

use crate::broadcast::RoomManager;
use crate::config::{ClientConfig, ServerConfig};
use crate::endpoint::{ApiServer, ApiState};
use crate::ledger::{LedgerError, StrokeLedger};
use crate::server::FeedServer;
use crate::storage::{MemoryStorage, StorageError, StrokeStorage};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Open the configured storage. Without the `rocksdb` feature a configured
/// path is ignored with a warning.
pub fn open_storage(config: &ServerConfig) -> Result<Arc<dyn StrokeStorage>, BackendError> {
    #[cfg(feature = "rocksdb")]
    {
        if let Some(path) = &config.storage_path {
            let storage = crate::storage::RocksStorage::open(crate::storage::StorageConfig {
                path: path.clone(),
                ..crate::storage::StorageConfig::default()
            })?;
            return Ok(Arc::new(storage));
        }
    }

    #[cfg(not(feature = "rocksdb"))]
    {
        if let Some(path) = &config.storage_path {
            log::warn!(
                "Storage path {} ignored: built without the rocksdb feature, strokes live in memory",
                path.display()
            );
        }
    }

    Ok(Arc::new(MemoryStorage::new()))
}

/// Both servers bound and the ledger opened, not yet accepting.
pub struct Backend {
    ledger: Arc<StrokeLedger>,
    api: ApiServer,
    feed: FeedServer,
    api_key: Option<String>,
    insert_secret: Option<String>,
}

impl Backend {
    pub async fn bind(config: &ServerConfig) -> Result<Self, BackendError> {
        let storage = open_storage(config)?;
        Self::bind_with_storage(config, storage).await
    }

    pub async fn bind_with_storage(
        config: &ServerConfig,
        storage: Arc<dyn StrokeStorage>,
    ) -> Result<Self, BackendError> {
        let rooms = Arc::new(RoomManager::new(config.broadcast_capacity));
        let ledger = Arc::new(StrokeLedger::open(config.ledger.clone(), storage, rooms.clone())?);

        if let Some(seed) = &config.seed_page {
            if ledger.page(&seed.id)?.is_none() {
                ledger.register_page(seed.clone())?;
            }
        }

        let api = ApiServer::bind(&config.http_addr, ApiState::new(ledger.clone(), config)).await?;
        let feed = FeedServer::bind(&config.feed_addr, rooms).await?;

        Ok(Self {
            ledger,
            api,
            feed,
            api_key: config.api_key.clone(),
            insert_secret: config.insert_secret.clone(),
        })
    }

    pub fn ledger(&self) -> &Arc<StrokeLedger> {
        &self.ledger
    }

    pub fn http_addr(&self) -> io::Result<SocketAddr> {
        self.api.local_addr()
    }

    pub fn feed_addr(&self) -> io::Result<SocketAddr> {
        self.feed.local_addr()
    }

    /// Client settings that reach this backend with its credentials.
    pub fn client_config(&self) -> io::Result<ClientConfig> {
        Ok(ClientConfig {
            api_key: self.api_key.clone(),
            insert_secret: self.insert_secret.clone(),
            ..ClientConfig::local(self.http_addr()?.port(), self.feed_addr()?.port())
        })
    }

    /// Serve until either server fails.
    pub async fn run(self) -> Result<(), BackendError> {
        tokio::try_join!(self.api.run(), self.feed.run())?;
        Ok(())
    }
}
