//! Page sessions over the in-process backend.
//!
//! Same engine as the networked tests, with the ledger called directly, so
//! the scenarios here are fast and deterministic.

use inkwall_collab::{LedgerConfig, LocalBackend, PageSession, SaveNotice, SessionEvent};
use inkwall_core::{
    CanonicalStroke, PageMeta, Point, PointReducer, Stroke, StrokeDraft, StrokeId, TempId, Tool,
    ToolSettings,
};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

const PAGE: &str = "page_01";
const WAIT: Duration = Duration::from_secs(5);

fn backend(config: LedgerConfig) -> LocalBackend {
    let backend = LocalBackend::in_memory(config).unwrap();
    backend
        .ledger()
        .register_page(PageMeta::new(PAGE, 1200, 800))
        .unwrap();
    backend
}

async fn open(backend: &LocalBackend, session: &str) -> (PageSession, mpsc::Receiver<SessionEvent>) {
    let mut page = PageSession::activate(
        PAGE.into(),
        ToolSettings::default(),
        session.into(),
        backend.collaborators(),
    )
    .await
    .unwrap();
    let events = page.take_event_rx().unwrap();
    (page, events)
}

async fn next_event(events: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("session event channel closed")
}

/// Skip echoes of earlier strokes until the next confirmation.
async fn next_confirmed(events: &mut mpsc::Receiver<SessionEvent>) -> TempId {
    loop {
        match next_event(events).await {
            SessionEvent::Confirmed { temp_id, .. } => return temp_id,
            SessionEvent::EchoSuppressed(_) => {}
            other => panic!("unexpected event {other:?}"),
        }
    }
}

async fn settle(page: &PageSession, f: impl FnMut(&Vec<Stroke>) -> bool) {
    let mut rx = page.watch();
    timeout(WAIT, rx.wait_for(f))
        .await
        .expect("timed out waiting for render list")
        .unwrap();
}

fn line(from: f64, n: usize) -> Vec<Point> {
    (0..n).map(|i| Point::new(from + i as f64, from)).collect()
}

#[tokio::test]
async fn test_three_point_stroke_committed() {
    let backend = backend(LedgerConfig::for_testing());
    let (mut page, mut events) = open(&backend, "sess-a").await;

    let points = vec![Point::new(1.0, 1.0), Point::new(2.0, 3.0), Point::new(4.0, 6.0)];
    let temp_id = page.draw(points.clone()).unwrap().unwrap();

    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::Confirmed { temp_id: t, .. } if t == temp_id
    ));
    settle(&page, |list| list.len() == 1 && !list[0].is_pending()).await;

    let list = page.snapshot();
    assert_eq!(list[0].id, StrokeId::Committed("s-1".into()));
    assert_eq!(list[0].points(), points.as_slice());
    assert!(list.iter().all(|s| s.id != StrokeId::Pending(temp_id)));
    page.deactivate().await;
}

#[tokio::test]
async fn test_long_gesture_is_reduced_before_submit() {
    let backend = backend(LedgerConfig::for_testing());
    let (mut page, mut events) = open(&backend, "sess-a").await;

    let first = page.draw(line(0.0, 301)).unwrap().unwrap();
    assert_eq!(next_confirmed(&mut events).await, first);

    let stored = backend.ledger().strokes(&PAGE.into()).unwrap();
    let points = &stored[0].draft.points;
    assert_eq!(points.len(), 151);
    assert_eq!(points.last(), Some(&Point::new(300.0, 0.0)));

    // A custom reducer keeps every third point.
    page.set_reducer(PointReducer::new(100, 3));
    let second = page.draw(line(1000.0, 301)).unwrap().unwrap();
    assert_eq!(next_confirmed(&mut events).await, second);
    let stored = backend.ledger().strokes(&PAGE.into()).unwrap();
    assert_eq!(stored[1].draft.points.len(), 101);
    page.deactivate().await;
}

#[tokio::test]
async fn test_rate_limited_second_stroke() {
    let backend = backend(LedgerConfig {
        cooldown: Duration::from_secs(60),
        ..LedgerConfig::default()
    });
    let (mut page, mut events) = open(&backend, "sess-a").await;

    page.draw(line(0.0, 4)).unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::Confirmed { .. }
    ));
    let temp_id = page.draw(line(10.0, 4)).unwrap().unwrap();

    // The first stroke's echo may still arrive in between.
    loop {
        match next_event(&mut events).await {
            SessionEvent::Rejected {
                temp_id: rejected,
                notice,
                ..
            } => {
                assert_eq!(rejected, temp_id);
                assert_eq!(notice, SaveNotice::RateLimited);
                break;
            }
            SessionEvent::EchoSuppressed(_) => {}
            other => panic!("unexpected event {other:?}"),
        }
    }

    settle(&page, |list| list.len() == 1 && !list[0].is_pending()).await;
    assert_eq!(page.snapshot()[0].id, StrokeId::Committed("s-1".into()));
    page.deactivate().await;
}

#[tokio::test]
async fn test_remote_stroke_during_own_submission() {
    let backend = backend(LedgerConfig::for_testing());
    for i in 0..6 {
        backend
            .ledger()
            .insert(StrokeDraft {
                page_id: PAGE.into(),
                session_id: "sess-seed".into(),
                color: "#000".into(),
                width: 1.0,
                points: line(i as f64 * 10.0, 2),
                tool: Tool::Pen,
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
    }

    let (mut alice, mut alice_events) = open(&backend, "sess-a").await;
    let (mut bob, mut bob_events) = open(&backend, "sess-b").await;

    let alice_temp = alice.draw(line(100.0, 3)).unwrap().unwrap();
    bob.draw(line(200.0, 3)).unwrap();

    let mut alice_confirmed = None;
    let mut alice_saw_bob = false;
    while alice_confirmed.is_none() || !alice_saw_bob {
        match next_event(&mut alice_events).await {
            SessionEvent::Confirmed { temp_id, id } => {
                assert_eq!(temp_id, alice_temp);
                alice_confirmed = Some(id);
            }
            SessionEvent::RemoteStroke(_) => alice_saw_bob = true,
            SessionEvent::EchoSuppressed(_) => {}
            other => panic!("unexpected event {other:?}"),
        }
    }
    let alice_id = alice_confirmed.unwrap();

    loop {
        if let SessionEvent::RemoteStroke(id) = next_event(&mut bob_events).await {
            assert_eq!(id, alice_id);
            break;
        }
    }

    settle(&alice, |list| list.len() == 8 && list.iter().all(|s| !s.is_pending())).await;
    settle(&bob, |list| list.len() == 8 && list.iter().all(|s| !s.is_pending())).await;
    for page in [&alice, &bob] {
        let list = page.snapshot();
        let copies = list
            .iter()
            .filter(|s| s.id == StrokeId::Committed(alice_id.clone()))
            .count();
        assert_eq!(copies, 1);
    }
    assert!(["s-7", "s-8"].contains(&alice_id.as_str()));

    alice.deactivate().await;
    bob.deactivate().await;
}

#[tokio::test]
async fn test_deactivate_releases_feed() {
    let backend = backend(LedgerConfig::for_testing());
    let (page, _events) = open(&backend, "sess-a").await;
    assert_eq!(backend.ledger().rooms().room_count().await, 1);

    page.deactivate().await;
    assert_eq!(backend.ledger().rooms().room_count().await, 0);

    // Strokes accepted afterwards go nowhere and do not fail.
    let accepted: CanonicalStroke = backend
        .ledger()
        .insert(StrokeDraft {
            page_id: PAGE.into(),
            session_id: "sess-b".into(),
            color: "#000".into(),
            width: 1.0,
            points: line(0.0, 2),
            tool: Tool::Eraser,
            created_at: chrono::Utc::now(),
        })
        .await
        .unwrap();
    assert_eq!(accepted.id.as_str(), "s-1");
}
