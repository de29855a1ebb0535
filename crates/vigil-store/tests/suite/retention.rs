use vigil_store::{NewBreakpoint, PendingHit, Store, StoreOptions};

fn new_breakpoint(expressions: &[&str]) -> NewBreakpoint {
    NewBreakpoint {
        file: "shop/orders.rs".to_string(),
        line: 40,
        condition: None,
        expressions: expressions.iter().map(|e| e.to_string()).collect(),
    }
}

fn pending(breakpoint_id: u64, values: &[&str]) -> PendingHit {
    PendingHit {
        breakpoint_id,
        values: values.iter().map(|v| v.to_string()).collect(),
    }
}

#[test]
fn removing_breakpoint_keeps_hits_and_values() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
    let bp = store.add_breakpoint(&new_breakpoint(&["order.total", "user"])).unwrap();

    store
        .log_hits_batch(&[pending(bp.id, &["10", "'ann'"]), pending(bp.id, &["12", "'bo'"])])
        .unwrap();
    let before = store.get_hits(bp.id).unwrap();
    assert_eq!(before.len(), 2);
    assert!(before.iter().all(|hit| hit.breakpoint_id == Some(bp.id)));
    let expressions = store.expressions(bp.id).unwrap();
    assert_eq!(
        store.hit_values(before[0].id).unwrap()[1].expression_id,
        Some(expressions[1].id)
    );

    assert!(store.remove_breakpoint(bp.id).unwrap());
    assert_eq!(store.get_breakpoint(bp.id).unwrap(), None);
    assert!(store.expressions(bp.id).unwrap().is_empty());

    let after = store.get_hits(bp.id).unwrap();
    assert_eq!(after.len(), 2);
    assert!(after.iter().all(|hit| hit.breakpoint_id.is_none()));
    assert!(after.iter().all(|hit| hit.origin_breakpoint_id == bp.id));
    assert_eq!(after[0].values, vec!["10", "'ann'"]);
    assert_eq!(after[1].values, vec!["12", "'bo'"]);
    assert!(store
        .hit_values(after[0].id)
        .unwrap()
        .iter()
        .all(|value| value.expression_id.is_none()));
}

#[test]
fn breakpoint_ids_are_not_reused() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path(), StoreOptions::default()).unwrap();

    let first = store.add_breakpoint(&new_breakpoint(&[])).unwrap();
    assert!(store.remove_breakpoint(first.id).unwrap());
    let second = store.add_breakpoint(&new_breakpoint(&[])).unwrap();

    assert!(second.id > first.id);
    assert!(store.get_hits(second.id).unwrap().is_empty());
}

#[test]
fn hits_are_scoped_to_their_breakpoint() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
    let a = store.add_breakpoint(&new_breakpoint(&["a"])).unwrap();
    let b = store.add_breakpoint(&new_breakpoint(&["b"])).unwrap();

    let ids = store
        .log_hits_batch(&[pending(a.id, &["1"]), pending(b.id, &["2"]), pending(a.id, &["3"])])
        .unwrap();
    assert_eq!(ids.len(), 3);
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));

    let a_hits: Vec<_> = store
        .get_hits(a.id)
        .unwrap()
        .into_iter()
        .map(|hit| hit.values)
        .collect();
    assert_eq!(a_hits, vec![vec!["1".to_string()], vec!["3".to_string()]]);
    assert_eq!(store.get_hits(b.id).unwrap().len(), 1);
}
