use vigil_sandbox::{Object, Sandbox, SandboxError, Scope, Value};

fn scope() -> Scope {
    Scope::new()
        .with_local("xs", vec![1, 2, 3])
        .with_local("config", std::collections::BTreeMap::from([("debug", false)]))
        .with_local(
            "order",
            Object::new("Order").with_field("id", 7).with_field("status", "open"),
        )
}

fn assert_safety(sandbox: &Sandbox, text: &str, scope: &Scope) {
    match sandbox.evaluate(text, scope) {
        Err(SandboxError::Safety(_)) => {}
        other => panic!("{text:?} should be a safety violation, got {other:?}"),
    }
}

#[test]
fn object_internals_are_unreachable() {
    let sandbox = Sandbox::new();
    let scope = scope();
    for text in [
        "xs.__class__.__bases__",
        "order.__dict__",
        "getattr(order, '__class__')",
        "hasattr(order, '__setattr__')",
        "order.__setattr__('id', 1)",
        "__builtins__",
    ] {
        assert_safety(&sandbox, text, &scope);
    }
    assert!(sandbox
        .evaluate_to_string("xs.__class__.__bases__", &scope)
        .starts_with("<Safety violation: "));
}

#[test]
fn mutating_methods_leave_the_scope_untouched() {
    let sandbox = Sandbox::new();
    let scope = scope();

    assert_eq!(
        sandbox.evaluate_to_string("xs.append(4)", &scope),
        "<Safety violation: call to method 'append' of 'list' object is not allowed>"
    );
    for text in ["xs.sort()", "xs.pop()", "config.update({})", "config.clear()"] {
        assert_safety(&sandbox, text, &scope);
    }
    assert_eq!(sandbox.evaluate_to_string("xs", &scope), "[1, 2, 3]");
    assert_eq!(scope.locals()["xs"], Value::list([1, 2, 3].map(Value::Int)));
}

#[test]
fn statements_are_blocked_before_they_execute() {
    let sandbox = Sandbox::new();
    let scope = scope();
    let cases = [
        ("x = 1", "assignment to name 'x' is not allowed"),
        ("order.status = 'paid'", "assignment to attribute 'status' is not allowed"),
        ("xs[0] = 9", "item assignment is not allowed"),
        ("xs[1:] = []", "slice assignment is not allowed"),
        ("xs += [4]", "assignment to name 'xs' is not allowed"),
        ("(n := len(xs))", "assignment to name 'n' is not allowed"),
        ("del xs[0]", "item deletion is not allowed"),
        ("del order.status", "deletion of attribute 'status' is not allowed"),
        ("import os", "import of 'os' is not allowed"),
        ("from subprocess import run", "import of 'subprocess' is not allowed"),
        ("raise", "raising exceptions is not allowed"),
        ("raise xs", "raising exceptions is not allowed"),
    ];
    for (text, message) in cases {
        assert_eq!(
            sandbox.evaluate(text, &scope),
            Err(SandboxError::Safety(message.to_string())),
            "{text}"
        );
    }
    assert_eq!(sandbox.evaluate_to_string("xs", &scope), "[1, 2, 3]");
}

#[test]
fn denied_builtins_resolve_but_cannot_be_called() {
    let sandbox = Sandbox::new();
    let scope = scope();
    for text in [
        "open('/etc/passwd')",
        "eval('1')",
        "exec('x = 1')",
        "print(xs)",
        "setattr(order, 'id', 1)",
        "globals()",
    ] {
        assert_safety(&sandbox, text, &scope);
    }
    assert_eq!(
        sandbox.evaluate_to_string("print", &scope),
        "<built-in function print>"
    );
}

#[test]
fn unknown_methods_on_objects_are_denied() {
    let sandbox = Sandbox::new();
    let scope = scope();
    assert_eq!(
        sandbox.evaluate("order.cancel()", &scope),
        Err(SandboxError::Safety(
            "call to method 'cancel' of 'Order' object is not allowed".to_string()
        ))
    );
}

#[test]
fn unreached_branches_are_not_violations() {
    let sandbox = Sandbox::new();
    let scope = scope();
    assert_eq!(sandbox.evaluate_to_string("False and xs.append(1)", &scope), "False");
    assert_eq!(
        sandbox.evaluate_to_string("len(xs) if xs else print('empty')", &scope),
        "3"
    );
}

#[test]
fn key_functions_must_be_allowed_builtins() {
    let sandbox = Sandbox::new();
    let scope = Scope::new().with_local("words", vec!["bb", "a", "ccc"]);
    assert_eq!(
        sandbox.evaluate_to_string("sorted(words, key=len)", &scope),
        "['a', 'bb', 'ccc']"
    );
    assert_safety(&sandbox, "sorted(words, key=print)", &scope);
}
