use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use tempfile::TempDir;
use vigil_debugger::{
    scope, BreakpointId, Debugger, DebuggerError, FireOutcome, InstrumentError, Instrumenter,
    Store, StoreOptions,
};
use vigil_store::NewBreakpoint;

use super::{options, shutdown, Client};

fn persist(store: &Store, file: &str, line: u32) -> BreakpointId {
    store
        .add_breakpoint(&NewBreakpoint {
            file: file.into(),
            line,
            condition: None,
            expressions: vec!["n".into()],
        })
        .unwrap()
        .id
}

#[test]
fn persisted_breakpoints_are_rearmed_on_start() {
    let dir = TempDir::new().unwrap();
    let (known, unknown) = {
        let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
        (
            persist(&store, "src/known.rs", 8),
            persist(&store, "src/gone.rs", 1),
        )
    };

    let debugger = Debugger::start(options(&dir).with_site("./src/known.rs", 8)).unwrap();
    assert!(debugger.registry().is_armed("src/known.rs", 8));
    assert!(debugger.registry().is_pending("src/gone.rs", 1, unknown));

    // The unresolvable breakpoint is still stored and can still be fired.
    let n = 1;
    assert_eq!(debugger.fire(unknown, &scope!(n)), FireOutcome::Queued);
    assert_eq!(debugger.fire(known, &scope!(n)), FireOutcome::Queued);
    debugger.shutdown();

    let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
    assert_eq!(store.list_breakpoints().unwrap().len(), 2);
    assert_eq!(store.hit_count().unwrap(), 2);
}

#[test]
fn shutdown_writes_everything_queued_and_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let debugger = Debugger::start(options(&dir)).unwrap();
    let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
    let id = persist(&store, "src/a.rs", 1);

    for n in 0..100 {
        debugger.fire(id, &scope!(n));
    }
    debugger.shutdown();
    debugger.shutdown();
    assert_eq!(store.hit_count().unwrap(), 100);

    let n = 0;
    assert_eq!(debugger.fire(id, &scope!(n)), FireOutcome::Failed);
}

#[test]
fn occupied_port_fails_to_start() {
    let dir = TempDir::new().unwrap();
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();

    let err = Debugger::start(options(&dir).with_port(port)).unwrap_err();
    assert!(matches!(err, DebuggerError::Io(_)), "unexpected error: {err}");
}

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<(&'static str, String, u32, BreakpointId)>>,
}

impl Instrumenter for Recorder {
    fn instrument(&self, file: &str, line: u32, id: BreakpointId) -> Result<(), InstrumentError> {
        self.calls.lock().push(("instrument", file.to_owned(), line, id));
        Ok(())
    }

    fn deinstrument(
        &self,
        file: &str,
        line: u32,
        id: BreakpointId,
    ) -> Result<(), InstrumentError> {
        self.calls.lock().push(("deinstrument", file.to_owned(), line, id));
        Err(InstrumentError::LineNotFound {
            file: file.to_owned(),
            line,
        })
    }
}

#[tokio::test]
async fn custom_instrumenter_sees_add_and_remove() {
    let dir = TempDir::new().unwrap();
    let recorder = Arc::new(Recorder::default());
    let debugger = Debugger::start_with_instrumenter(
        options(&dir).with_site("lib/x.rs", 3),
        recorder.clone(),
    )
    .unwrap();
    // Declared sites belong to the built-in registry, which stays unused.
    assert!(debugger.registry().sites().is_empty());
    let mut client = Client::connect(&debugger, None).await;

    let reply = client
        .request(json!({"type": "add", "file": "lib/x.rs", "line": 3}))
        .await;
    let id = reply["breakpoint"]["id"].as_u64().unwrap();
    // A failed deinstrument is logged; the removal still succeeds.
    let reply = client.request(json!({"type": "remove", "id": id})).await;
    assert_eq!(reply, json!({"type": "remove", "id": id}));

    assert_eq!(
        *recorder.calls.lock(),
        vec![
            ("instrument", "lib/x.rs".to_owned(), 3, id),
            ("deinstrument", "lib/x.rs".to_owned(), 3, id),
        ]
    );

    client.close().await;
    shutdown(debugger).await;
}
