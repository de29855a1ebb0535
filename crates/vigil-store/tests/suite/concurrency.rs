use std::sync::{Arc, Barrier};
use std::thread;

use vigil_store::{NewBreakpoint, PendingHit, Store, StoreOptions};

#[test]
fn concurrent_handles_record_every_hit() {
    const THREADS: usize = 8;
    const HITS_PER_THREAD: usize = 25;

    let dir = tempfile::tempdir().unwrap();
    let owner = Store::open(dir.path(), StoreOptions::default()).unwrap();
    let bp = owner
        .add_breakpoint(&NewBreakpoint {
            file: "worker.rs".to_string(),
            line: 3,
            condition: None,
            expressions: vec!["i".to_string()],
        })
        .unwrap();

    let db_path = owner.path().to_path_buf();
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let db_path = db_path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let store = Store::connect(&db_path, StoreOptions::default()).unwrap();
                barrier.wait();
                for i in 0..HITS_PER_THREAD {
                    store
                        .log_hit(&PendingHit {
                            breakpoint_id: bp.id,
                            values: vec![format!("{}", t * HITS_PER_THREAD + i)],
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let hits = owner.get_hits(bp.id).unwrap();
    assert_eq!(hits.len(), THREADS * HITS_PER_THREAD);
    let mut seen: Vec<usize> = hits
        .iter()
        .map(|hit| hit.values[0].parse().unwrap())
        .collect();
    seen.sort_unstable();
    assert_eq!(seen, (0..THREADS * HITS_PER_THREAD).collect::<Vec<_>>());
}

#[test]
fn removal_racing_with_writes_never_fails_a_write() {
    let dir = tempfile::tempdir().unwrap();
    let owner = Store::open(dir.path(), StoreOptions::default()).unwrap();
    let bp = owner
        .add_breakpoint(&NewBreakpoint {
            file: "race.rs".to_string(),
            line: 9,
            condition: None,
            expressions: vec![],
        })
        .unwrap();

    let db_path = owner.path().to_path_buf();
    let writer = thread::spawn(move || {
        let store = Store::connect(&db_path, StoreOptions::default()).unwrap();
        for _ in 0..50 {
            store
                .log_hit(&PendingHit {
                    breakpoint_id: bp.id,
                    values: vec![],
                })
                .unwrap();
        }
    });
    assert!(owner.remove_breakpoint(bp.id).unwrap());
    writer.join().unwrap();

    let hits = owner.get_hits(bp.id).unwrap();
    assert_eq!(hits.len(), 50);
    assert!(hits.iter().all(|hit| hit.origin_breakpoint_id == bp.id));
}
