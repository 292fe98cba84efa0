use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use inkwall_core::{
    CanonicalStroke, OptimisticStore, PageId, Point, PointReducer, SessionId, StrokeDraft,
    TempId, Tool,
};

fn draft(session: &str, offset: f64, points: usize) -> StrokeDraft {
    StrokeDraft {
        page_id: PageId::from("page_01"),
        session_id: SessionId::from(session),
        color: "#ff0066".to_string(),
        width: 3.0,
        points: (0..points)
            .map(|i| Point::new(offset + i as f64, offset))
            .collect(),
        tool: Tool::Pen,
        created_at: Utc::now(),
    }
}

fn bench_reduce_long_path(c: &mut Criterion) {
    let reducer = PointReducer::default();
    let raw: Vec<Point> = (0..2_000).map(|i| Point::new(i as f64, 0.5)).collect();

    c.bench_function("reduce_2000_points", |b| {
        b.iter(|| black_box(reducer.reduce_points(black_box(raw.clone()))))
    });
}

fn bench_merge_remote(c: &mut Criterion) {
    let rows: Vec<CanonicalStroke> = (0..1_000)
        .map(|i| CanonicalStroke::new(format!("s-{i}"), draft("peer", i as f64, 32)))
        .collect();

    c.bench_function("merge_remote_1K", |b| {
        b.iter(|| {
            let mut store = OptimisticStore::new(PageId::from("page_01"));
            for row in &rows {
                black_box(store.merge_remote(row.clone()));
            }
        })
    });
}

fn bench_echo_promotion(c: &mut Criterion) {
    // 500 committed strokes, then 20 pending echoed back by the feed.
    let committed: Vec<CanonicalStroke> = (0..500)
        .map(|i| CanonicalStroke::new(format!("s-{i}"), draft("peer", i as f64, 32)))
        .collect();
    let mine: Vec<StrokeDraft> = (0..20).map(|i| draft("me", 1_000.0 + i as f64, 32)).collect();

    c.bench_function("echo_promotion_20_pending", |b| {
        b.iter(|| {
            let mut store = OptimisticStore::new(PageId::from("page_01"));
            store.seed(committed.iter().cloned());
            for d in &mine {
                let _ = store.insert_pending(TempId::new(), d.clone());
            }
            for (i, d) in mine.iter().enumerate() {
                let echo = CanonicalStroke::new(format!("s-{}", 500 + i), d.clone());
                black_box(store.merge_remote(echo));
            }
        })
    });
}

criterion_group!(
    benches,
    bench_reduce_long_path,
    bench_merge_remote,
    bench_echo_promotion,
);
criterion_main!(benches);
