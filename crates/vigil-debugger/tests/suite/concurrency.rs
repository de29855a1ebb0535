use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use tempfile::TempDir;
use vigil_debugger::{scope, Debugger, FireOutcome, Store, StoreOptions};
use vigil_store::NewBreakpoint;

use super::options;

const THREADS: usize = 8;
const FIRES_PER_THREAD: usize = 25;

#[test]
fn concurrent_fires_each_record_exactly_one_hit() {
    let dir = TempDir::new().unwrap();
    let debugger = Debugger::start(options(&dir)).unwrap();
    let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
    let id = store
        .add_breakpoint(&NewBreakpoint {
            file: "src/worker.rs".into(),
            line: 30,
            condition: None,
            expressions: vec!["worker * 1000 + i".into(), "worker".into()],
        })
        .unwrap()
        .id;

    let debugger = Arc::new(debugger);
    let handles: Vec<_> = (0..THREADS)
        .map(|worker| {
            let debugger = Arc::clone(&debugger);
            thread::spawn(move || {
                for i in 0..FIRES_PER_THREAD {
                    assert_eq!(debugger.fire(id, &scope!(worker, i)), FireOutcome::Queued);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    debugger.shutdown();

    let hits = store.get_hits(id).unwrap();
    assert_eq!(hits.len(), THREADS * FIRES_PER_THREAD);
    assert_eq!(store.hit_count().unwrap(), (THREADS * FIRES_PER_THREAD) as u64);

    let seen: HashSet<_> = hits.iter().map(|hit| hit.values.clone()).collect();
    let expected: HashSet<_> = (0..THREADS)
        .flat_map(|worker| {
            (0..FIRES_PER_THREAD)
                .map(move |i| vec![(worker * 1000 + i).to_string(), worker.to_string()])
        })
        .collect();
    assert_eq!(seen, expected);
}

#[test]
fn hits_from_one_thread_keep_their_order() {
    let dir = TempDir::new().unwrap();
    let debugger = Debugger::start(options(&dir)).unwrap();
    let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
    let id = store
        .add_breakpoint(&NewBreakpoint {
            file: "src/loop.rs".into(),
            line: 2,
            condition: Some("i % 2 == 0".into()),
            expressions: vec!["i".into()],
        })
        .unwrap()
        .id;

    for i in 0..40 {
        debugger.fire(id, &scope!(i));
    }
    debugger.shutdown();

    let values: Vec<String> = store
        .get_hits(id)
        .unwrap()
        .into_iter()
        .map(|hit| hit.values[0].clone())
        .collect();
    let expected: Vec<String> = (0..40).step_by(2).map(|i| i.to_string()).collect();
    assert_eq!(values, expected);
}
