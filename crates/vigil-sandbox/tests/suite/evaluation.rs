use serde::Serialize;
use serde_json::json;
use vigil_sandbox::{scope, Object, Sandbox, SandboxError, SandboxOptions, Scope, Value};

#[derive(Serialize)]
struct LineItem {
    sku: String,
    qty: u32,
    price: f64,
}

fn order() -> Object {
    Object::new("Order")
        .with_field("id", 7)
        .with_field("customer", "ann")
        .with_field("items", vec!["pen", "ink"])
        .with_field("total", 12.5)
}

#[test]
fn arithmetic_renders_like_the_host() {
    let sandbox = Sandbox::new();
    let scope = Scope::new();
    for (text, expected) in [
        ("1+1", "2"),
        ("7 / 2", "3.5"),
        ("1.0 * 2", "2.0"),
        ("-7 // 2", "-4"),
        ("2 ** 10", "1024"),
        ("0.1 + 0.2", "0.30000000000000004"),
        ("10 % 3 == 1", "True"),
        ("not 0", "True"),
        ("None", "None"),
    ] {
        assert_eq!(sandbox.evaluate_to_string(text, &scope), expected, "{text}");
    }
}

#[test]
fn containers_render_with_quoted_strings() {
    let sandbox = Sandbox::new();
    let scope = Scope::new();
    assert_eq!(
        sandbox.evaluate_to_string("[1, 'a', None, True]", &scope),
        "[1, 'a', None, True]"
    );
    assert_eq!(sandbox.evaluate_to_string("(1,)", &scope), "(1,)");
    assert_eq!(sandbox.evaluate_to_string("{'k': [1.5]}", &scope), "{'k': [1.5]}");
    assert_eq!(sandbox.evaluate_to_string("'top level'", &scope), "top level");
}

#[test]
fn objects_expose_fields() {
    let sandbox = Sandbox::new();
    let scope = Scope::new().with_local("order", order());

    assert_eq!(
        sandbox.evaluate_to_string("order", &scope),
        "Order(id=7, customer='ann', items=['pen', 'ink'], total=12.5)"
    );
    assert_eq!(sandbox.evaluate_to_string("order.id + 1", &scope), "8");
    assert_eq!(sandbox.evaluate_to_string("len(order.items)", &scope), "2");
    assert_eq!(
        sandbox.evaluate_to_string("order.customer.upper()", &scope),
        "ANN"
    );
    assert_eq!(
        sandbox.evaluate_to_string("getattr(order, 'missing', 'n/a')", &scope),
        "n/a"
    );
    assert_eq!(
        sandbox.evaluate_to_string("order.missing", &scope),
        "<Evaluation error: AttributeError: 'Order' object has no attribute 'missing'>"
    );
}

#[test]
fn serializable_values_can_be_captured() {
    let sandbox = Sandbox::new();
    let item = LineItem {
        sku: "pen".to_string(),
        qty: 3,
        price: 1.5,
    };
    let captured = Object::from_serialize("LineItem", &item).unwrap();
    let payload = Value::from(json!({"tags": ["a", "b"], "note": null}));
    let scope = Scope::new()
        .with_local("item", captured)
        .with_local("payload", payload);

    assert_eq!(sandbox.evaluate_to_string("item.qty * item.price", &scope), "4.5");
    assert_eq!(
        sandbox.evaluate_to_string("payload.get('tags')[-1]", &scope),
        "b"
    );
    assert_eq!(
        sandbox.evaluate_to_string("payload['note'] is None", &scope),
        "True"
    );
}

#[test]
fn scope_macro_captures_by_reference() {
    let sandbox = Sandbox::new();
    let prices = vec![3, 1, 2];
    let discount = 1;
    let scope = scope!(prices, discount, label = "sale");

    assert_eq!(
        sandbox.evaluate_to_string("sorted(prices)[-1] - discount", &scope),
        "2"
    );
    assert_eq!(sandbox.evaluate_to_string("label", &scope), "sale");
    // Still usable: the macro only borrowed.
    assert_eq!(prices.len(), 3);
}

#[test]
fn locals_shadow_globals() {
    let sandbox = Sandbox::new();
    let mut scope = Scope::new();
    scope
        .insert_global("limit", Value::Int(10))
        .insert_global("region", Value::str("eu"))
        .insert_local("limit", Value::Int(3));
    assert_eq!(sandbox.evaluate_to_string("(limit, region)", &scope), "(3, 'eu')");
}

#[test]
fn conditions_use_truthiness() {
    let sandbox = Sandbox::new();
    let scope = Scope::new()
        .with_local("total", 12)
        .with_local("tags", Vec::<String>::new());

    assert_eq!(sandbox.evaluate_condition("total > 10", &scope), Ok(true));
    assert_eq!(sandbox.evaluate_condition("tags", &scope), Ok(false));
    assert_eq!(sandbox.evaluate_condition("'x'", &scope), Ok(true));
    assert!(sandbox.evaluate_condition("total > missing", &scope).is_err());
}

#[test]
fn runtime_errors_become_markers() {
    let sandbox = Sandbox::new();
    let scope = Scope::new();
    assert_eq!(
        sandbox.evaluate_to_string("missing", &scope),
        "<Evaluation error: NameError: name 'missing' is not defined>"
    );
    assert!(sandbox
        .evaluate_to_string("1 // 0", &scope)
        .starts_with("<Evaluation error: ZeroDivisionError"));
    assert!(sandbox
        .evaluate_to_string("9223372036854775807 + 1", &scope)
        .contains("OverflowError"));
    assert!(sandbox
        .evaluate_to_string("1 +", &scope)
        .starts_with("<Compilation error: "));
}

#[test]
fn unhashable_dict_keys_are_type_errors() {
    let sandbox = Sandbox::new();
    let scope = Scope::new();
    for text in ["{[1]: 2}", "{}[[1]]", "[1] in {'a': 1}", "{}.get([1])", "dict([([1], 2)])"] {
        assert_eq!(
            sandbox.evaluate_to_string(text, &scope),
            "<Evaluation error: TypeError: unhashable type: 'list'>",
            "{text}"
        );
    }
    assert_eq!(
        sandbox.evaluate_to_string("{(1, {}): 2}", &scope),
        "<Evaluation error: TypeError: unhashable type: 'dict'>"
    );
    assert_eq!(sandbox.evaluate_to_string("{(1, 'a'): 2}", &scope), "{(1, 'a'): 2}");
}

#[test]
fn sibling_expressions_are_independent() {
    let sandbox = Sandbox::new();
    let scope = Scope::new().with_local("xs", vec![1, 2, 3]);
    let values: Vec<String> = ["len(xs)", "xs.append(4)", "xs[5]", "sum(xs)"]
        .iter()
        .map(|text| sandbox.evaluate_to_string(text, &scope))
        .collect();

    assert_eq!(values[0], "3");
    assert!(values[1].starts_with("<Safety violation: "));
    assert!(values[2].starts_with("<Evaluation error: "));
    assert_eq!(values[3], "6");
}

#[test]
fn limits_are_configurable() {
    let sandbox = Sandbox::with_options(SandboxOptions {
        max_steps: 5,
        max_collection_len: 10,
    });
    let scope = Scope::new();

    assert_eq!(
        sandbox.evaluate("1 + 2 + 3 + 4 + 5", &scope),
        Err(SandboxError::StepLimit(5))
    );
    assert!(matches!(
        sandbox.evaluate("'ab' * 50", &scope),
        Err(SandboxError::Evaluation(_))
    ));
    assert!(matches!(
        sandbox.evaluate("list(range(100))", &scope),
        Err(SandboxError::Evaluation(_))
    ));
}
