//! Persistence integration tests.
//!
//! Verifies:
//! - Accepted strokes and pages survive a ledger restart
//! - The id sequence resumes after the last persisted stroke
//! - A backend started on an existing directory serves the old history

#![cfg(feature = "rocksdb")]

use std::sync::Arc;

use inkwall_collab::{
    Backend, HttpPageSource, LedgerConfig, LocalBackend, PageSource, RocksStorage, RoomManager,
    ServerConfig, StorageConfig, StrokeLedger, StrokeStorage, StrokeWriter,
};
use inkwall_core::{PageMeta, Point, StrokeDraft, Tool};
use tempfile::tempdir;

fn draft(session: &str, x: f64) -> StrokeDraft {
    StrokeDraft {
        page_id: "page_01".into(),
        session_id: session.into(),
        color: "#336699".into(),
        width: 4.0,
        points: vec![Point::new(x, 0.0), Point::new(x + 1.0, 2.0), Point::new(x + 3.0, 5.0)],
        tool: Tool::Pen,
        created_at: chrono::Utc::now(),
    }
}

fn open_ledger(path: &std::path::Path) -> StrokeLedger {
    let storage: Arc<dyn StrokeStorage> =
        Arc::new(RocksStorage::open(StorageConfig::for_testing(path)).unwrap());
    StrokeLedger::open(
        LedgerConfig::for_testing(),
        storage,
        Arc::new(RoomManager::new(16)),
    )
    .unwrap()
}

#[tokio::test]
async fn test_strokes_survive_restart() {
    let dir = tempdir().unwrap();

    let before = {
        let ledger = open_ledger(dir.path());
        ledger.register_page(PageMeta::new("page_01", 640, 480)).unwrap();
        let backend = LocalBackend::new(Arc::new(ledger));
        let mut accepted = Vec::new();
        for (i, session) in ["a", "b", "a"].iter().enumerate() {
            accepted.push(backend.submit(draft(session, i as f64 * 10.0)).await.unwrap());
        }
        accepted
    };

    let ledger = open_ledger(dir.path());
    let page = ledger.page(&"page_01".into()).unwrap().unwrap();
    assert_eq!((page.width, page.height), (640, 480));
    assert_eq!(ledger.strokes(&"page_01".into()).unwrap(), before);

    let next = ledger.insert(draft("c", 100.0)).await.unwrap();
    assert_eq!(next.id.as_str(), "s-4");
}

#[tokio::test]
async fn test_backend_serves_history_after_restart() {
    let dir = tempdir().unwrap();
    {
        let ledger = open_ledger(dir.path());
        ledger.register_page(PageMeta::new("page_01", 1200, 800)).unwrap();
        ledger.insert(draft("a", 0.0)).await.unwrap();
        ledger.insert(draft("b", 5.0)).await.unwrap();
    }

    let config = ServerConfig {
        storage_path: Some(dir.path().to_path_buf()),
        ..ServerConfig::for_testing()
    };
    let backend = Backend::bind(&config).await.unwrap();
    let client = backend.client_config().unwrap();
    tokio::spawn(async move {
        backend.run().await.unwrap();
    });

    let pages = HttpPageSource::new(client).unwrap();
    let rows = pages.fetch_strokes(&"page_01".into()).await.unwrap();
    let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["s-1", "s-2"]);
}
