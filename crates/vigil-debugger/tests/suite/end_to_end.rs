use serde_json::json;
use tempfile::TempDir;
use vigil_debugger::{scope, Debugger};

use super::{options, shutdown, Client};

#[tokio::test]
async fn add_fire_remove_keeps_history() {
    let dir = TempDir::new().unwrap();
    let debugger = Debugger::start(options(&dir).with_site("a.rs", 10)).unwrap();
    let mut client = Client::connect(&debugger, None).await;

    let reply = client
        .request(json!({"type": "add", "file": "a.rs", "line": 10, "expressions": ["x"]}))
        .await;
    assert_eq!(reply["type"], "add");
    assert_eq!(reply["breakpoint"]["file"], "a.rs");
    assert_eq!(reply["breakpoint"]["expressions"], json!(["x"]));
    let id = reply["breakpoint"]["id"].as_u64().unwrap();

    let x = 5;
    debugger.probe("a.rs", 10, || scope!(x));
    let hit = client.next_hit().await;
    assert_eq!(hit["hits"].as_array().unwrap().len(), 1);
    assert_eq!(hit["hits"][0]["breakpointId"], id);
    assert_eq!(hit["hits"][0]["values"], json!(["5"]));
    let hit_id = hit["hits"][0]["id"].clone();

    let reply = client.request(json!({"type": "remove", "id": id})).await;
    assert_eq!(reply, json!({"type": "remove", "id": id}));

    let reply = client.request(json!({"type": "hits", "id": id})).await;
    assert_eq!(reply["type"], "hits");
    assert_eq!(reply["breakpointId"], id);
    let hits = reply["hits"].as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["id"], hit_id);
    assert_eq!(hits[0]["breakpointId"], json!(null));
    assert_eq!(hits[0]["values"], json!(["5"]));
    assert!(hits[0]["date"].as_str().unwrap().ends_with('Z'));

    // Disarmed: the scope is never built.
    debugger.probe("a.rs", 10, || panic!("disarmed probe captured its scope"));

    let reply = client.request(json!({"type": "remove", "id": id})).await;
    assert_eq!(
        reply,
        json!({"type": "error", "message": "Breakpoint with the specified ID does not exist."})
    );

    client.close().await;
    shutdown(debugger).await;
}

#[tokio::test]
async fn false_condition_is_never_broadcast() {
    let dir = TempDir::new().unwrap();
    let debugger = Debugger::start(options(&dir).with_site("src/cart.rs", 4)).unwrap();
    let mut client = Client::connect(&debugger, None).await;

    let reply = client
        .request(json!({
            "type": "add",
            "file": "src/cart.rs",
            "line": 4,
            "condition": "len(items) > 2",
            "expressions": ["items[-1]", "items.append('x')"],
        }))
        .await;
    let id = reply["breakpoint"]["id"].as_u64().unwrap();

    let items = vec!["tea", "cake"];
    debugger.probe("src/cart.rs", 4, || scope!(items));
    let items = vec!["tea", "cake", "jam"];
    debugger.probe("src/cart.rs", 4, || scope!(items));

    let hit = client.next_hit().await;
    assert_eq!(hit["hits"][0]["breakpointId"], id);
    assert_eq!(
        hit["hits"][0]["values"],
        json!([
            "jam",
            "<Safety violation: call to method 'append' of 'list' object is not allowed>"
        ])
    );
    assert_eq!(items.len(), 3);

    let reply = client.request(json!({"type": "hits", "id": id})).await;
    assert_eq!(reply["hits"].as_array().unwrap().len(), 1);

    client.close().await;
    shutdown(debugger).await;
}

#[tokio::test]
async fn every_client_receives_each_batch() {
    let dir = TempDir::new().unwrap();
    let debugger = Debugger::start(options(&dir).with_site("src/job.rs", 1)).unwrap();
    let mut first = Client::connect(&debugger, None).await;
    let mut second = Client::connect(&debugger, None).await;

    first
        .request(json!({"type": "add", "file": "src/job.rs", "line": 1, "expressions": ["n"]}))
        .await;
    // A round trip on the second connection proves it is subscribed.
    second.request(json!({"type": "breakpoints"})).await;

    let n = 7;
    debugger.probe("src/job.rs", 1, || scope!(n));
    assert_eq!(first.next_hit().await["hits"][0]["values"], json!(["7"]));
    assert_eq!(second.next_hit().await["hits"][0]["values"], json!(["7"]));

    first.close().await;
    second.close().await;
    shutdown(debugger).await;
}

#[tokio::test]
async fn malformed_requests_keep_the_connection_open() {
    let dir = TempDir::new().unwrap();
    let debugger = Debugger::start(options(&dir)).unwrap();
    let mut client = Client::connect(&debugger, None).await;

    client.send_text("{not json").await;
    assert_eq!(
        client.recv().await,
        json!({"type": "error", "message": "Invalid JSON body."})
    );
    let reply = client.request(json!({"type": "add", "file": "a.rs"})).await;
    assert_eq!(
        reply["message"],
        "Missing file or line to insert a breakpoint on."
    );
    let reply = client.request(json!({"type": "nope"})).await;
    assert_eq!(reply["message"], "Invalid message type.");

    let reply = client.request(json!({"type": "breakpoints"})).await;
    assert_eq!(reply, json!({"type": "breakpoints", "breakpoints": []}));

    client.close().await;
    shutdown(debugger).await;
}
