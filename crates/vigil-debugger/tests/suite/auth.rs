use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_tungstenite::tungstenite;
use vigil_debugger::Debugger;

use super::{options, shutdown, url, Client};

#[tokio::test]
async fn wrong_or_missing_password_is_forbidden() {
    let dir = TempDir::new().unwrap();
    let debugger = Debugger::start(options(&dir).with_password("hunter2")).unwrap();

    for password in [Some("nope"), None] {
        let err = tokio_tungstenite::connect_async(url(&debugger, password))
            .await
            .unwrap_err();
        let tungstenite::Error::Http(response) = err else {
            panic!("expected an HTTP rejection, got {err:?}");
        };
        assert_eq!(response.status().as_u16(), 403);
        let body: Value = serde_json::from_slice(response.body().as_deref().unwrap()).unwrap();
        assert_eq!(
            body,
            json!({"type": "error", "message": "Authentication failed."})
        );
    }

    let mut client = Client::connect(&debugger, Some("hunter2")).await;
    let reply = client.request(json!({"type": "breakpoints"})).await;
    assert_eq!(reply["type"], "breakpoints");

    client.close().await;
    shutdown(debugger).await;
}

#[tokio::test]
async fn no_password_configured_accepts_anyone() {
    let dir = TempDir::new().unwrap();
    let debugger = Debugger::start(options(&dir)).unwrap();
    let mut client = Client::connect(&debugger, Some("anything")).await;
    let reply = client.request(json!({"type": "breakpoints"})).await;
    assert_eq!(reply["breakpoints"], json!([]));
    client.close().await;
    shutdown(debugger).await;
}
