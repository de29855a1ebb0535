use vigil_store::{NewBreakpoint, PendingHit, Store, StoreOptions, DB_FILE_NAME};

#[test]
fn open_creates_nested_directory_and_reopens_idempotently() {
    let dir = tempfile::tempdir().unwrap();
    let store_dir = dir.path().join("nested").join(".vigil");

    let id = {
        let store = Store::open(&store_dir, StoreOptions::default()).unwrap();
        assert_eq!(store.path(), store_dir.join(DB_FILE_NAME));
        store
            .add_breakpoint(&NewBreakpoint {
                file: "svc/app.rs".to_string(),
                line: 7,
                condition: Some("n % 2 == 0".to_string()),
                expressions: vec!["n".to_string()],
            })
            .unwrap()
            .id
    };

    let reopened = Store::open(&store_dir, StoreOptions::default()).unwrap();
    let listed = reopened.list_breakpoints().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, id);
    assert_eq!(listed[0].condition.as_deref(), Some("n % 2 == 0"));
    assert_eq!(listed[0].expressions, vec!["n"]);
}

#[test]
fn connect_shares_the_database_opened_by_the_owner() {
    let dir = tempfile::tempdir().unwrap();
    let owner = Store::open(dir.path(), StoreOptions::default()).unwrap();
    let bp = owner
        .add_breakpoint(&NewBreakpoint {
            file: "a.rs".to_string(),
            line: 1,
            condition: None,
            expressions: vec![],
        })
        .unwrap();

    let handle = Store::connect(owner.path(), StoreOptions::default()).unwrap();
    assert_eq!(handle.get_breakpoint(bp.id).unwrap(), Some(bp.clone()));

    handle
        .log_hit(&PendingHit {
            breakpoint_id: bp.id,
            values: vec![],
        })
        .unwrap();
    assert_eq!(owner.get_hits(bp.id).unwrap().len(), 1);
}

#[test]
fn failed_batch_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
    let bp = store
        .add_breakpoint(&NewBreakpoint {
            file: "a.rs".to_string(),
            line: 1,
            condition: None,
            expressions: vec!["x".to_string()],
        })
        .unwrap();

    // Without the value table the batch cannot complete.
    let raw = rusqlite::Connection::open(store.path()).unwrap();
    raw.execute_batch("DROP TABLE expression_value;").unwrap();
    drop(raw);

    let hits = vec![
        PendingHit {
            breakpoint_id: bp.id,
            values: vec!["1".to_string()],
        },
        PendingHit {
            breakpoint_id: bp.id,
            values: vec!["2".to_string()],
        },
    ];
    assert!(store.log_hits_batch(&hits).is_err());
    assert_eq!(store.hit_count().unwrap(), 0);
}

#[test]
fn failed_expression_insert_rolls_back_the_breakpoint() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path(), StoreOptions::default()).unwrap();

    let raw = rusqlite::Connection::open(store.path()).unwrap();
    raw.execute_batch(
        "CREATE TRIGGER reject_expressions BEFORE INSERT ON expression \
         BEGIN SELECT RAISE(ABORT, 'expressions rejected'); END;",
    )
    .unwrap();
    drop(raw);

    let with_expressions = NewBreakpoint {
        file: "a.rs".to_string(),
        line: 4,
        condition: None,
        expressions: vec!["x".to_string(), "y".to_string()],
    };
    assert!(store.add_breakpoint(&with_expressions).is_err());
    assert!(store.list_breakpoints().unwrap().is_empty());

    let bare = NewBreakpoint {
        expressions: Vec::new(),
        ..with_expressions
    };
    let added = store.add_breakpoint(&bare).unwrap();
    assert_eq!(store.list_breakpoints().unwrap(), vec![added]);
}
