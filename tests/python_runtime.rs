//! End-to-end runs against a real CPython interpreter.
//!
//! Run with `cargo test -- --ignored` on a machine with `python3` on PATH.

use std::path::Path;
use std::sync::Arc;

use scriptbox::config::ScriptboxConfig;
use scriptbox::deps::{CommandInstaller, DependencyResolver};
use scriptbox::runtime::{PythonRuntime, ScriptRuntime};
use scriptbox::sandbox::{Channel, Engine, RunMode, RunOutcome, RunRequest, ScriptFile, Workspace};
use scriptbox::{Boundary, RunResult};

fn engine(workdir: &Path) -> Engine {
    let config = ScriptboxConfig::default();
    let runtime = Arc::new(PythonRuntime::new(&config.runtime).unwrap());
    let installer = Arc::new(CommandInstaller::from_config(&config.resolver).unwrap());
    let resolver = DependencyResolver::new(&config.resolver, config.telemetry.clone(), installer);
    Engine::new(runtime, resolver, Workspace::new(workdir).unwrap())
}

async fn run(source: &str) -> RunResult {
    let dir = tempfile::tempdir().unwrap();
    engine(dir.path())
        .run(&RunRequest::single("main.py", source))
        .await
        .unwrap()
}

fn error_text(result: &RunResult) -> &str {
    match result.outcome() {
        RunOutcome::Error(text) => text,
        other => panic!("expected an error, got {:?}", other),
    }
}

#[tokio::test]
#[ignore]
async fn test_sync_main_division_by_zero() {
    let result = run("def main():\n    return 1/0\n").await;

    assert_eq!(result.mode(), RunMode::EntrySync);
    let text = error_text(&result);
    assert!(text.contains("ZeroDivisionError: division by zero"), "{text}");
    assert!(text.contains("main.py"), "{text}");
    assert!(!text.contains("harness"), "{text}");
    assert!(!text.contains("<frozen"), "{text}");
}

#[tokio::test]
#[ignore]
async fn test_async_main_return_value() {
    let result = run("async def main():\n    return 42\n").await;

    assert_eq!(result.mode(), RunMode::EntryAsync);
    assert_eq!(
        result.outcome(),
        &RunOutcome::Success(Some(scriptbox::runtime::ScriptValue::Int(42)))
    );
}

#[tokio::test]
#[ignore]
async fn test_no_main_prints() {
    let result = run("import sys\nprint('hello')\nprint('oops', file=sys.stderr)\n").await;

    assert_eq!(result.mode(), RunMode::NoEntryPoint);
    assert_eq!(result.outcome(), &RunOutcome::Success(None));
    assert_eq!(result.output(Channel::Primary), "hello\n");
    assert_eq!(result.output(Channel::Diagnostic), "oops\n");
}

#[tokio::test]
#[ignore]
async fn test_interleaved_channels_keep_write_order() {
    let source = "import sys\n\nfor i in range(50):\n    print(f'o{i}')\n    print(f'e{i}', file=sys.stderr)\n";
    let result = run(source).await;

    let stream = result.stream();
    assert_eq!(stream.len(), 100);
    for (i, pair) in stream.chunks(2).enumerate() {
        assert_eq!(pair[0].channel, Channel::Primary);
        assert_eq!(pair[0].text, format!("o{i}\n"));
        assert_eq!(pair[1].channel, Channel::Diagnostic);
        assert_eq!(pair[1].text, format!("e{i}\n"));
    }
}

#[tokio::test]
#[ignore]
async fn test_async_main_raising() {
    let source = "import asyncio\n\nasync def main():\n    await asyncio.sleep(0)\n    raise ValueError('bad input')\n";
    let result = run(source).await;

    assert_eq!(result.mode(), RunMode::EntryAsync);
    let text = error_text(&result);
    assert!(text.contains("ValueError: bad input"), "{text}");
    assert!(text.contains("main.py\", line 5, in main"), "{text}");
    assert!(!text.contains("asyncio"), "{text}");
    assert!(!text.contains("harness"), "{text}");
}

#[tokio::test]
#[ignore]
async fn test_syntax_error() {
    let result = run("def main(:\n    pass\n").await;

    assert_eq!(result.mode(), RunMode::Undetermined);
    let text = error_text(&result);
    assert!(text.contains("SyntaxError"), "{text}");
    assert!(!text.contains("Traceback"), "{text}");
}

#[tokio::test]
#[ignore]
async fn test_main_guard_does_not_run_twice() {
    let source = "def main():\n    print('main')\n\nif __name__ == '__main__':\n    main()\n";
    let result = run(source).await;
    assert_eq!(result.output(Channel::Primary), "main\n");
}

#[tokio::test]
#[ignore]
async fn test_sibling_module_import() {
    let dir = tempfile::tempdir().unwrap();
    let request = RunRequest::new(vec![
        ScriptFile::new("helpers.py", "def greet():\n    return 'hi'\n"),
        ScriptFile::new("main.py", "import helpers\n\ndef main():\n    return helpers.greet()\n")
            .with_active_index(1),
    ]);

    let result = engine(dir.path()).run(&request).await.unwrap();
    assert_eq!(
        result.outcome(),
        &RunOutcome::Success(Some("hi".into()))
    );
}

#[tokio::test]
#[ignore]
async fn test_imports_and_environment() {
    let runtime = PythonRuntime::new(&ScriptboxConfig::default().runtime).unwrap();
    let imports = runtime
        .find_imports("import os\nfrom collections import deque\nimport numpy.linalg\n")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(imports, vec!["os", "collections", "numpy.linalg"]);
    assert_eq!(runtime.find_imports("def (").await.unwrap(), None);

    let present = runtime
        .resolvable(
            &["os".to_string(), "scriptbox_missing_module".to_string()],
            Path::new("."),
        )
        .await
        .unwrap();
    assert_eq!(present, vec!["os"]);

    let info = runtime.describe().await.unwrap();
    assert_eq!(info.implementation, "CPython");
}

#[tokio::test]
#[ignore]
async fn test_boundary_wire_form() {
    let dir = tempfile::tempdir().unwrap();
    let boundary = Boundary::new(engine(dir.path()));

    let response = boundary
        .run_script(None, b"def main():\n    print('x')\n    return {'a': [1, 2.5, None]}\n")
        .await;

    assert_eq!(response.status, 200);
    assert_eq!(response.body["mode"], "main");
    assert_eq!(response.body["stream"][0]["channel"], "out");
    assert_eq!(response.body["stream"][0]["text"], "x\n");
    assert_eq!(
        response.body["result"]["returnValue"],
        serde_json::json!({"a": [1, 2.5, null]})
    );
}

#[tokio::test]
#[ignore]
async fn test_deeply_nested_return_values() {
    let dir = tempfile::tempdir().unwrap();
    let boundary = Boundary::new(engine(dir.path()));
    let source = |depth: usize| {
        format!(
            "def main():\n    value = 1\n    for _ in range({depth}):\n        value = {{'k': value}}\n    return value\n"
        )
    };

    let response = boundary.run_script(None, source(30).as_bytes()).await;
    assert_eq!(response.status, 200);
    let mut value = &response.body["result"]["returnValue"];
    for _ in 0..30 {
        value = &value["k"];
    }
    assert_eq!(value, &serde_json::json!(1));

    // Too deep to represent: a serialization failure, not a host fault
    let response = boundary.run_script(None, source(45).as_bytes()).await;
    assert_eq!(response.status, 400);
    assert!(response.body["detail"]
        .as_str()
        .unwrap()
        .starts_with("Failed to serialize response: "));
}
