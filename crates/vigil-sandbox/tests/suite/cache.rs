use std::sync::Arc;
use std::thread;

use vigil_sandbox::{Effect, Sandbox, SandboxError, Scope};

#[test]
fn repeated_compiles_share_one_entry() {
    let sandbox = Sandbox::new();
    let first = sandbox.compile("a + b");
    let second = sandbox.compile("a + b");
    assert!(Arc::ptr_eq(&first, &second));
    assert!(first.is_ok());
    assert_eq!(first.source(), "a + b");
    assert_eq!(sandbox.cached_len(), 1);
}

#[test]
fn compile_failures_are_cached() {
    let sandbox = Sandbox::new();
    let first = sandbox.compile("order.(");
    let second = sandbox.compile("order.(");
    assert!(Arc::ptr_eq(&first, &second));
    assert!(matches!(first.error(), Some(SandboxError::Compile(_))));

    let scope = Scope::new();
    let marker = sandbox.evaluate_to_string("order.(", &scope);
    assert!(marker.starts_with("<Compilation error: "), "{marker}");
    assert_eq!(sandbox.cached_len(), 1);
}

#[test]
fn reserved_names_fail_at_compile_time() {
    let sandbox = Sandbox::new();
    let compiled = sandbox.compile("x.__class__");
    assert!(compiled.error().is_some_and(SandboxError::is_safety_violation));
    assert!(compiled.effects().is_empty());
}

#[test]
fn effects_are_classified_statically() {
    let sandbox = Sandbox::new();
    let read = sandbox.compile("len(xs) > 0 and xs[0]");
    assert!(!read.effects().contains(&Effect::Mutable));
    assert!(read.effects().contains(&Effect::Contextual));

    let write = sandbox.compile("xs[0] = 1");
    assert!(write.effects().contains(&Effect::Mutable));
}

#[test]
fn concurrent_evaluation_is_consistent() {
    let sandbox = Arc::new(Sandbox::new());
    let expressions = ["n * 2", "str(n)", "n > 3", "[n] * 2", "n.bad"];

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let sandbox = Arc::clone(&sandbox);
            thread::spawn(move || {
                let scope = Scope::new().with_local("n", n);
                (0..50)
                    .map(|i| {
                        let text = expressions[i % expressions.len()];
                        (n, text, sandbox.evaluate_to_string(text, &scope))
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for handle in handles {
        for (n, text, value) in handle.join().unwrap() {
            let expected = match text {
                "n * 2" => (n * 2).to_string(),
                "str(n)" => n.to_string(),
                "n > 3" => if n > 3 { "True" } else { "False" }.to_string(),
                "[n] * 2" => format!("[{n}, {n}]"),
                _ => "<Evaluation error: AttributeError: 'int' object has no attribute 'bad'>"
                    .to_string(),
            };
            assert_eq!(value, expected, "n={n} text={text}");
        }
    }
    assert_eq!(sandbox.cached_len(), expressions.len());
}
