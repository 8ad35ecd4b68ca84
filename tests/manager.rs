//! End-to-end behaviour of the manager against in-memory tool servers.

use serde_json::{json, Value};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use toolpool::testing::{MockConnector, MockStats, MockToolServer};
use toolpool::{LoadOutcome, LogEntry, ManagerError, ManagerOptions, ServerConfig, ToolManager};

fn config() -> ServerConfig {
    ServerConfig::from_json(
        r#"{"mcpServers": {
            "calc": {"local_path": "calc.py"},
            "fs": {"local_path": "fs.py"},
            "flaky": {"local_path": "flaky.py"}
        }}"#,
    )
    .expect("config should parse")
}

fn options() -> ManagerOptions {
    ManagerOptions {
        call_timeout: Some(Duration::from_secs(10)),
        ..ManagerOptions::default()
    }
}

fn fs_server() -> MockToolServer {
    MockToolServer::new()
        .with_scenario_support()
        .with_operation("ls", "List files", |state, _| {
            Ok(state.get("files").cloned().unwrap_or(json!([])).to_string())
        })
}

fn connector_with(calc: MockToolServer, fs: MockToolServer) -> MockConnector {
    MockConnector::new()
        .with_server("calc.py", calc)
        .with_server("fs.py", fs)
        .with_server(
            "flaky.py",
            MockToolServer::new().with_scenario_support().failing_close(),
        )
}

fn start(connector: MockConnector, options: ManagerOptions) -> (ToolManager, MockStats) {
    let stats = connector.stats();
    let manager = ToolManager::with_connector(&config(), Arc::new(connector), options)
        .expect("manager should start");
    (manager, stats)
}

fn default_manager() -> (ToolManager, MockStats) {
    start(
        connector_with(MockToolServer::calculator(), fs_server()),
        options(),
    )
}

#[test]
fn concurrent_first_references_share_one_session() {
    let (manager, _) = default_manager();

    let handles: Vec<_> = thread::scope(|s| {
        let workers: Vec<_> = (0..8)
            .map(|_| s.spawn(|| manager.registry().get_or_create("fs-1")))
            .collect();
        workers
            .into_iter()
            .map(|w| w.join().expect("thread").expect("session").0)
            .collect()
    });

    assert_eq!(manager.registry().len(), 1);
    assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
}

#[test]
fn discovery_builds_catalog() {
    let (manager, stats) = default_manager();
    assert_eq!(manager.catalog().len(), 3);
    assert!(manager.catalog().is_stateless("calc"));
    assert!(!manager.catalog().is_stateless("fs"));
    // Each group was connected to once and released.
    assert_eq!(stats.connects(), 3);
    assert_eq!(stats.closes(), 3);
    assert!(manager.registry().is_empty());

    let names: Vec<String> = manager
        .tool_schemas()
        .iter()
        .filter_map(|s| s["function"]["name"].as_str().map(str::to_string))
        .collect();
    assert!(names.contains(&"calc-add".to_string()));
    assert!(names.contains(&"fs-load_scenario".to_string()));
}

#[test]
fn discovery_failure_is_reported() {
    let connector = MockConnector::new().with_server("calc.py", MockToolServer::calculator());
    let err = ToolManager::with_connector(&config(), Arc::new(connector), options())
        .err()
        .expect("missing servers should fail discovery");
    assert!(matches!(err, ManagerError::UnexpectedFailure(_)));
}

#[test]
fn load_then_save_round_trip() {
    let (manager, _) = default_manager();
    let state = json!({"files": ["a.txt", "b.txt"]});

    let outcome = manager.load("fs-1", state.clone(), true).expect("load");
    assert!(matches!(outcome, LoadOutcome::Loaded { verified: true, .. }));
    assert_eq!(manager.registry().info("fs-1").map(|i| i.ready), Some(true));

    let saved = manager.invoke("fs-1", "fs-save_scenario", "{}").expect("save");
    assert_eq!(saved.value, state);
    let listing = manager.invoke("fs-1", "fs-ls", "").expect("ls");
    assert_eq!(listing.value, json!(["a.txt", "b.txt"]));
}

#[test]
fn verification_mismatch_leaves_session_unready() {
    let fs = MockToolServer::new().with_scenario_echo(Arc::new(|mut state: Value| {
        state["extra"] = json!(1);
        state
    }));
    let (manager, _) = start(connector_with(MockToolServer::calculator(), fs), options());

    let outcome = manager
        .load("fs-1", json!({"files": []}), true)
        .expect("load should not error");
    match outcome {
        LoadOutcome::VerificationMismatch { expected, saved } => {
            assert_eq!(expected, json!({"files": []}));
            assert_eq!(saved, json!({"files": [], "extra": 1}));
        }
        other => panic!("expected mismatch, got {other:?}"),
    }
    assert_eq!(manager.registry().info("fs-1").map(|i| i.ready), Some(false));
}

#[test]
fn second_load_makes_no_remote_call() {
    let (manager, stats) = default_manager();
    let first = manager.load("fs-1", json!({"files": ["a"]}), false).expect("load");
    assert!(matches!(first, LoadOutcome::Loaded { verified: false, .. }));

    let second = manager.load("fs-1", json!({"files": ["b"]}), true).expect("load");
    assert_eq!(second, LoadOutcome::AlreadyInitialized);
    assert_eq!(stats.calls("load_scenario"), 1);
    assert_eq!(stats.calls("save_scenario"), 0);
}

#[test]
fn concurrent_loads_apply_once() {
    let (manager, stats) = default_manager();

    let outcomes: Vec<LoadOutcome> = thread::scope(|s| {
        let workers: Vec<_> = (0..6)
            .map(|i| {
                let manager = &manager;
                s.spawn(move || manager.load("fs-1", json!({"files": [i]}), false))
            })
            .collect();
        workers
            .into_iter()
            .map(|w| w.join().expect("thread").expect("load"))
            .collect()
    });

    let loaded = outcomes
        .iter()
        .filter(|o| matches!(o, LoadOutcome::Loaded { .. }))
        .count();
    assert_eq!(loaded, 1);
    assert!(outcomes.iter().all(LoadOutcome::is_ready));
    assert_eq!(stats.calls("load_scenario"), 1);
}

#[test]
fn empty_scenario_is_skipped() {
    let (manager, stats) = default_manager();
    let outcome = manager.load("fs-1", json!({}), true).expect("load");
    assert_eq!(outcome, LoadOutcome::EmptyScenario);
    assert_eq!(stats.calls("load_scenario"), 0);
    assert_eq!(manager.registry().info("fs-1").map(|i| i.ready), Some(false));
}

#[test]
fn failed_load_is_reported() {
    let (manager, _) = default_manager();
    // The calculator has no load operation.
    let err = manager.load("calc-1", json!({"x": 1}), false).unwrap_err();
    assert!(matches!(err, ManagerError::LoadFailed(_)));
}

#[test]
fn unknown_group_creates_no_session() {
    let (manager, _) = default_manager();
    let err = manager.invoke("math-1", "math-add", "{}").unwrap_err();
    assert!(matches!(err, ManagerError::UnknownGroup(ref g) if g == "math"));
    let err = manager.load("math-1", json!({"a": 1}), false).unwrap_err();
    assert!(matches!(err, ManagerError::UnknownGroup(_)));
    assert!(manager.registry().is_empty());
}

#[test]
fn malformed_arguments_create_no_session() {
    let (manager, _) = default_manager();
    let err = manager.invoke("calc-1", "calc-add", "{not json").unwrap_err();
    assert!(matches!(err, ManagerError::MalformedArguments(_)));
    assert!(!manager.registry().contains("calc-1"));
}

#[test]
fn calculator_end_to_end() {
    let (manager, _) = default_manager();

    let sum = manager
        .invoke("calc-1", "calc-add", json!({"a": 2, "b": 3}))
        .expect("add");
    assert_eq!(sum.value, json!(5));
    assert_eq!(sum.raw, "5");
    // Stateless groups need no scenario.
    assert_eq!(manager.registry().info("calc-1").map(|i| i.ready), Some(true));

    let err = manager
        .invoke("calc-1", "calc-add", json!({"a": "x", "b": 1}))
        .unwrap_err();
    assert!(matches!(err, ManagerError::RejectedBeforeExecution(_)));

    let err = manager.invoke("calc-1", "calc-divide", "{}").unwrap_err();
    assert!(matches!(err, ManagerError::RejectedBeforeExecution(ref m) if m.contains("divide")));
}

#[test]
fn file_system_end_to_end() {
    let (manager, stats) = default_manager();
    let original = json!({"files": ["notes.md"]});

    let outcome = manager.load("fs-7", original.clone(), true).expect("load");
    assert!(outcome.is_ready());

    let again = manager
        .load("fs-7", json!({"files": ["other.md"]}), false)
        .expect("second load");
    assert_eq!(again, LoadOutcome::AlreadyInitialized);
    assert_eq!(again.to_string(), "This client is already initialized. Skipping...");

    let saved = manager.invoke("fs-7", "save_scenario", "{}").expect("save");
    assert_eq!(saved.value, original);
    assert_eq!(stats.calls("load_scenario"), 1);
}

#[test]
fn load_through_invoke_unwraps_scenario_argument() {
    let (manager, stats) = default_manager();
    let result = manager
        .invoke(
            "fs-2",
            "fs-load_scenario",
            json!({"scenario": {"files": ["x"]}}),
        )
        .expect("load via invoke");
    assert_eq!(result.value["status"], "loaded");
    assert_eq!(manager.registry().info("fs-2").map(|i| i.ready), Some(true));

    let repeat = manager
        .invoke("fs-2", "fs-load_scenario", json!({"scenario": {"files": ["y"]}}))
        .expect("repeat load");
    assert_eq!(repeat.value["status"], "already_initialized");
    assert_eq!(stats.calls("load_scenario"), 1);
}

#[test]
fn sessions_are_isolated() {
    let (manager, _) = default_manager();
    manager.load("fs-1", json!({"files": ["one"]}), false).expect("load 1");
    manager.load("fs-2", json!({"files": ["two"]}), false).expect("load 2");

    let saved = manager.save_all_scenarios();
    assert_eq!(saved.get("fs-1"), Some(&json!({"files": ["one"]})));
    assert_eq!(saved.get("fs-2"), Some(&json!({"files": ["two"]})));
}

#[test]
fn save_all_maps_failures_to_null() {
    let (manager, _) = default_manager();
    manager.load("fs-1", json!({"files": []}), false).expect("load");
    manager
        .invoke("calc-1", "calc-add", json!({"a": 1, "b": 1}))
        .expect("add");

    let saved = manager.save_all_scenarios();
    assert_eq!(saved.len(), 2);
    assert_eq!(saved.get("calc-1"), Some(&Value::Null));
    assert_eq!(saved.get("fs-1"), Some(&json!({"files": []})));
}

#[test]
fn calls_on_one_session_do_not_overlap() {
    let calc = MockToolServer::calculator().with_call_delay(Duration::from_millis(50));
    let (manager, stats) = start(connector_with(calc, fs_server()), options());

    thread::scope(|s| {
        for i in 0..4 {
            let manager = &manager;
            s.spawn(move || {
                manager
                    .invoke("calc-1", "calc-add", json!({"a": i, "b": 1}))
                    .expect("add")
            });
        }
    });

    assert_eq!(stats.calls("add"), 4);
    assert_eq!(stats.max_in_flight(), 1);
}

#[test]
fn calls_on_different_sessions_interleave() {
    let calc = MockToolServer::calculator().with_call_delay(Duration::from_millis(300));
    let (manager, stats) = start(connector_with(calc, fs_server()), options());

    thread::scope(|s| {
        for id in ["calc-1", "calc-2", "calc-3"] {
            let manager = &manager;
            s.spawn(move || {
                manager
                    .invoke(id, "calc-add", json!({"a": 1, "b": 1}))
                    .expect("add")
            });
        }
    });

    assert!(stats.max_in_flight() > 1);
}

#[test]
fn timeout_leaves_manager_usable() {
    let calc = MockToolServer::calculator().with_call_delay(Duration::from_millis(500));
    let options = ManagerOptions {
        call_timeout: Some(Duration::from_millis(50)),
        ..ManagerOptions::default()
    };
    let (manager, _) = start(connector_with(calc, fs_server()), options);

    let err = manager
        .invoke("calc-1", "calc-add", json!({"a": 1, "b": 1}))
        .unwrap_err();
    assert!(matches!(err, ManagerError::Timeout(_)));

    let outcome = manager.load("fs-1", json!({"files": ["a"]}), false).expect("load");
    assert!(outcome.is_ready());
}

#[test]
fn close_removes_session_and_releases_client() {
    let (manager, stats) = default_manager();
    let closes_before = stats.closes();
    manager.load("fs-1", json!({"files": []}), false).expect("load");

    assert!(manager.close("fs-1").expect("close"));
    assert!(!manager.registry().contains("fs-1"));
    assert_eq!(stats.closes(), closes_before + 1);
    assert!(!manager.close("fs-1").expect("second close"));

    // A later reference starts over with a fresh, unready session.
    let (_, ready) = manager.registry().get_or_create("fs-1").expect("recreate");
    assert!(!ready);
}

#[test]
fn close_failure_still_removes_session() {
    let (manager, _) = default_manager();
    manager.load("flaky-1", json!({"a": 1}), false).expect("load");

    let err = manager.close("flaky-1").unwrap_err();
    assert!(matches!(err, ManagerError::CloseFailure { ref session_id, .. } if session_id == "flaky-1"));
    assert!(manager.registry().is_empty());
}

#[test]
fn close_all_empties_registry_despite_failures() {
    let (manager, _) = default_manager();

    thread::scope(|s| {
        let manager = &manager;
        s.spawn(move || manager.load("flaky-1", json!({"a": 1}), false).expect("load flaky"));
        for i in 1..=4 {
            s.spawn(move || {
                manager
                    .load(&format!("fs-{i}"), json!({"files": [i]}), false)
                    .expect("load fs")
            });
        }
        s.spawn(move || {
            manager
                .invoke("calc-1", "calc-add", json!({"a": 1, "b": 2}))
                .expect("add")
        });
        // Never connected; releasing it is a no-op.
        s.spawn(move || manager.registry().get_or_create("fs-9").expect("create"));
    });
    assert_eq!(manager.registry().len(), 7);
    assert!(!manager.call_log().is_empty());

    let report = manager.close_all();
    assert_eq!(
        report.closed,
        vec!["calc-1", "fs-1", "fs-2", "fs-3", "fs-4", "fs-9"]
    );
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(
        &report.failures[0],
        ManagerError::CloseFailure { session_id, .. } if session_id == "flaky-1"
    ));
    assert!(!report.is_clean());
    assert!(manager.registry().is_empty());
    assert!(manager.call_log().is_empty());
}

#[test]
fn close_racing_invoke_leaves_no_client_open() {
    let (manager, stats) = default_manager();

    for _ in 0..500 {
        thread::scope(|s| {
            let manager = &manager;
            s.spawn(move || {
                match manager.invoke("calc-1", "calc-add", json!({"a": 1, "b": 1})) {
                    Ok(result) => assert_eq!(result.value, json!(2)),
                    Err(e) => assert!(matches!(e, ManagerError::SessionClosed(_)), "{e}"),
                }
            });
            s.spawn(move || manager.close("calc-1").expect("close"));
        });
    }
    manager.close_all();

    assert!(manager.registry().is_empty());
    assert_eq!(stats.connects(), stats.closes());
}

#[test]
fn invoke_on_closed_handle_does_not_reconnect() {
    let (manager, stats) = default_manager();
    let (handle, _) = manager.registry().get_or_create("fs-1").expect("create");
    manager.load("fs-1", json!({"files": ["a"]}), false).expect("load");
    assert!(manager.close("fs-1").expect("close"));
    assert!(handle.is_closed());

    let connects = stats.connects();
    // A fresh session under the same id connects its own client.
    manager.load("fs-1", json!({"files": ["b"]}), false).expect("reload");
    assert_eq!(stats.connects(), connects + 1);
    let saved = manager.invoke("fs-1", "fs-save_scenario", "{}").expect("save");
    assert_eq!(saved.value, json!({"files": ["b"]}));

    manager.close_all();
    assert_eq!(stats.connects(), stats.closes());
}

#[test]
fn dump_log_writes_grouped_records() {
    let (manager, _) = default_manager();
    manager
        .invoke("calc-7", "calc-add", json!({"a": 2, "b": 2}))
        .expect("add");
    manager.record_chat("fs-7", "what is 2+2?", "4");

    let entries = manager.call_log().entries("7");
    assert_eq!(entries.len(), 2);
    assert!(matches!(&entries[0], LogEntry::Tool { tool_name, tool_result, .. }
        if tool_name == "add" && tool_result == "4"));

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("log").join("log.jsonl");
    assert_eq!(manager.dump_log(Some(&path)).expect("dump"), 1);

    let text = std::fs::read_to_string(&path).expect("log file");
    let record: Value = serde_json::from_str(text.trim()).expect("json line");
    assert_eq!(
        record["7"][0],
        json!({"tool": {"tool_name": "add", "tool_args": {"a": 2, "b": 2}, "tool_result": "4"}})
    );
    assert_eq!(record["7"][1], json!({"chat": {"user": "what is 2+2?", "assistant": "4"}}));
}

#[test]
fn shutdown_stops_worker() {
    let (manager, _) = default_manager();
    manager.load("fs-1", json!({"files": []}), false).expect("load");

    let report = manager.shutdown(Duration::from_secs(5));
    assert!(report.is_clean());
    assert_eq!(report.close.closed, vec!["fs-1"]);

    let err = manager
        .invoke("calc-1", "calc-add", json!({"a": 1, "b": 1}))
        .unwrap_err();
    assert!(matches!(err, ManagerError::WorkerClosed));
}
