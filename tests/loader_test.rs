use std::fs;
use std::time::Duration;

use spindle::config::global::GlobalConfig;
use spindle::config::loader;
use spindle::config::KeyPath;
use spindle::dsl::builder::WorkflowDefBuilder;
use spindle::error::ConfigError;

#[test]
fn test_load_simple_yaml_workflow() {
    let yaml_content = r#"
name: "yaml-test-flow"
initial_point: 2
scheduling:
  graph: "foo => bar"
queues:
  main:
    limit: 1
    members: [foo]
runtime:
  foo:
    script: "echo foo"
    env:
      GREETING: "hello"
  bar:
    script: "echo bar"
"#;

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let file_path = temp_dir.path().join("flow.yaml");
    fs::write(&file_path, yaml_content).expect("Failed to write temp file");

    let loaded = loader::load_workflow(&file_path).expect("Failed to load workflow from YAML");

    let expected = WorkflowDefBuilder::new("yaml-test-flow")
        .initial_point(2)
        .graph("foo => bar")
        .queue("main", 1, &["foo"])
        .task("foo")
            .cfg("script", "echo foo")
            .env("GREETING", "hello")
            .build()
        .task("bar")
            .cfg("script", "echo bar")
            .build()
        .build();

    assert_eq!(loaded, expected);
    assert_eq!(loaded.task_names(), vec!["bar".to_string(), "foo".to_string()]);
    assert_eq!(loaded.queue_for("foo"), "main");
    assert_eq!(loaded.queue_for("bar"), "default");

    temp_dir.close().expect("Failed to close temp dir");
}

#[test]
fn test_missing_graph_is_rejected() {
    let yaml_content = r#"
name: "no-graph"
scheduling:
  graph: ""
runtime:
  foo:
    script: "true"
"#;
    let err = loader::parse_workflow(yaml_content).expect_err("must fail validation");
    assert!(matches!(err, ConfigError::MissingGraph));
    assert_eq!(err.to_string(), "missing [scheduling][graph] section");
}

#[test]
fn test_unknown_runtime_key_is_rejected() {
    let yaml_content = r#"
name: "bad-key"
scheduling:
  graph: "foo"
runtime:
  foo:
    scrpt: "typo"
"#;
    let err = loader::parse_workflow(yaml_content).expect_err("must fail validation");
    assert!(matches!(err, ConfigError::UnknownKey(_)), "got: {}", err);
}

#[test]
fn test_inheritance_cycle_is_rejected() {
    let yaml_content = r#"
name: "cycle"
scheduling:
  graph: "a"
runtime:
  a:
    inherit: b
  b:
    inherit: a
"#;
    let err = loader::parse_workflow(yaml_content).expect_err("must fail validation");
    assert!(matches!(err, ConfigError::InheritCycle(_)), "got: {}", err);
}

#[test]
fn test_unknown_queue_member_is_rejected() {
    let yaml_content = r#"
name: "bad-queue"
scheduling:
  graph: "foo"
queues:
  main:
    limit: 2
    members: [ghost]
runtime:
  foo:
    script: "true"
"#;
    let err = loader::parse_workflow(yaml_content).expect_err("must fail validation");
    assert!(matches!(err, ConfigError::UnknownNamespace(_)), "got: {}", err);
}

#[test]
fn test_runtime_config_follows_inheritance() {
    let yaml_content = r#"
name: "inherit"
scheduling:
  graph: "foo"
runtime:
  FAM:
    platform: "hpc"
    env:
      SHARED: "yes"
  foo:
    inherit: FAM
    script: "run"
    env:
      OWN: "also"
"#;
    let def = loader::parse_workflow(yaml_content).expect("loads");
    assert!(def.is_family("FAM"));
    assert_eq!(def.task_names(), vec!["foo".to_string()]);
    assert_eq!(
        def.ancestry("foo"),
        vec!["foo".to_string(), "FAM".to_string(), "root".to_string()]
    );

    let cfg = def.runtime_config("foo").expect("resolves");
    let get = |path: &[&str]| cfg.lookup(&KeyPath::of(path)).map(|v| v.to_string());
    assert_eq!(get(&["platform"]).as_deref(), Some("hpc"));
    assert_eq!(get(&["script"]).as_deref(), Some("run"));
    assert_eq!(get(&["env", "SHARED"]).as_deref(), Some("yes"));
    assert_eq!(get(&["env", "OWN"]).as_deref(), Some("also"));
}

#[test]
fn test_global_config_layers_site_then_user() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let site = temp_dir.path().join("site.yaml");
    let user = temp_dir.path().join("user.yaml");
    fs::write(
        &site,
        r#"
scheduler:
  tick_interval_ms: 50
platforms:
  hpc:
    host: "login01"
"#,
    )
    .expect("write site file");
    fs::write(
        &user,
        r#"
scheduler:
  tick_interval_ms: 25
"#,
    )
    .expect("write user file");

    let global = GlobalConfig::load(Some(site.as_path()), Some(user.as_path())).expect("layers load");
    assert_eq!(global.tick_interval(), Duration::from_millis(25));
    let host = global
        .platform("hpc")
        .and_then(|p| p.lookup(&KeyPath::of(&["host"])))
        .map(|v| v.to_string());
    assert_eq!(host.as_deref(), Some("login01"));

    temp_dir.close().expect("Failed to close temp dir");
}

#[test]
fn test_global_config_missing_files_use_defaults() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let absent = temp_dir.path().join("nothing.yaml");
    let global = GlobalConfig::load(Some(absent.as_path()), None).expect("absent files are skipped");
    assert_eq!(global.tick_interval(), Duration::from_millis(100));
    assert!(global.platform("localhost").is_some());
}

#[test]
fn test_global_config_rejects_unknown_keys() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let site = temp_dir.path().join("site.yaml");
    fs::write(
        &site,
        r#"
scheduler:
  tick_interval: 50
"#,
    )
    .expect("write site file");

    let err = GlobalConfig::load(Some(site.as_path()), None).expect_err("unknown key must fail");
    assert!(matches!(err, ConfigError::UnknownKey(_)), "got: {}", err);
}
