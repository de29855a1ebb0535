use serde_json::json;
use tempfile::TempDir;
use vigil_debugger::{probe, Debugger, Store, StoreOptions};
use vigil_store::NewBreakpoint;

use super::{options, shutdown, Client};

struct Order {
    id: u32,
    lines: Vec<(String, u32)>,
}

fn checkout(debugger: &Debugger, order: &Order) -> u32 {
    let total: u32 = order.lines.iter().map(|(_, cents)| cents).sum();
    let skus: Vec<&str> = order.lines.iter().map(|(sku, _)| sku.as_str()).collect();
    probe!(debugger, order_id = order.id, skus, total);
    total
}

/// Returns the location of its probe site.
#[rustfmt::skip]
fn tally(debugger: &Debugger, n: u32) -> (&'static str, u32) {
    probe!(debugger, n); (file!(), line!())
}

fn order(id: u32) -> Order {
    Order {
        id,
        lines: vec![("tea".to_owned(), 350), ("cake".to_owned(), 425)],
    }
}

#[tokio::test]
async fn probe_macro_site_can_be_armed_by_a_client() {
    let dir = TempDir::new().unwrap();
    let debugger = Debugger::start(options(&dir)).unwrap();

    // The first run registers the site.
    checkout(&debugger, &order(1));
    let (file, line) = debugger
        .registry()
        .sites()
        .into_iter()
        .find(|(file, _)| file.ends_with("probes.rs"))
        .expect("probe site registered");

    let mut client = Client::connect(&debugger, None).await;
    let reply = client
        .request(json!({
            "type": "add",
            "file": file,
            "line": line,
            "condition": "order_id != 3",
            "expressions": ["total / 100", "', '.join(skus)", "order_id"],
        }))
        .await;
    let id = reply["breakpoint"]["id"].as_u64().unwrap();

    checkout(&debugger, &order(3));
    checkout(&debugger, &order(2));
    let hit = client.next_hit().await;
    assert_eq!(hit["hits"][0]["breakpointId"], id);
    assert_eq!(hit["hits"][0]["values"], json!(["7.75", "tea, cake", "2"]));

    client.close().await;
    shutdown(debugger).await;
}

#[test]
fn persisted_breakpoint_arms_when_an_undeclared_site_first_runs() {
    let dir = TempDir::new().unwrap();
    let (file, line) = {
        let debugger = Debugger::start(options(&dir)).unwrap();
        let site = tally(&debugger, 0);
        debugger.shutdown();
        site
    };
    let id = Store::open(dir.path(), StoreOptions::default())
        .unwrap()
        .add_breakpoint(&NewBreakpoint {
            file: file.to_owned(),
            line,
            condition: None,
            expressions: vec!["n * 2".into()],
        })
        .unwrap()
        .id;

    // Restart without declaring the site.
    let debugger = Debugger::start(options(&dir)).unwrap();
    assert!(!debugger.registry().is_armed(file, line));
    assert!(debugger.registry().is_pending(file, line, id));

    for n in 1..=5 {
        tally(&debugger, n);
    }
    assert!(debugger.registry().is_armed(file, line));
    debugger.shutdown();

    let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
    let values: Vec<_> = store
        .get_hits(id)
        .unwrap()
        .into_iter()
        .map(|hit| hit.values)
        .collect();
    assert_eq!(values, (1..=5).map(|n| vec![(n * 2).to_string()]).collect::<Vec<_>>());
}
