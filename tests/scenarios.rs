//! End-to-end scenarios
//!
//! Suites built through the registry, finalized, scheduled against the
//! in-process engine and collected from a filesystem object store.

use std::sync::Arc;

use gtm_protocol::{FsObjectStore, ObjectStore, OUTS_PATH_KEY, RUN_FILTER_KEY};
use guest_test_manager::config::{ConfigLayer, ManagerConfig};
use guest_test_manager::{
    BufferedLogger, Finalizer, MockEngine, Outcome, ResultCollector, RunSummary, Scheduler,
    SuiteRegistry,
};
use regex_lite::Regex;
use tempfile::TempDir;

const SSH_OUTPUT: &str = "\
=== RUN   TestVm1
--- PASS: TestVm1 (0.01s)
=== RUN   TestVm2
--- PASS: TestVm2 (0.02s)
PASS
";

fn config(temp: &TempDir, images: &[&str]) -> ManagerConfig {
    ManagerConfig::load(
        None,
        ConfigLayer {
            project: Some("proj".to_string()),
            zone: Some("us-west1-b".to_string()),
            images: Some(images.iter().map(|i| i.to_string()).collect()),
            results_base: Some("gs://results/runs".to_string()),
            storage_root: Some(temp.path().to_path_buf()),
            ..Default::default()
        },
    )
    .unwrap()
}

#[test]
fn test_ssh_on_debian() {
    let filter = Regex::new("^ssh$").unwrap();
    let workflows = SuiteRegistry::with_builtin().build_workflows(&["debian-10".to_string()], Some(&filter));
    let ssh = workflows.iter().find(|w| w.name() == "ssh").unwrap();

    let graph = ssh.graph().unwrap();
    assert_eq!(ssh.vm_names(), vec!["vm1", "vm2"]);
    assert_eq!(graph.wait_steps_for("vm1"), vec!["wait-vm1"]);
    assert_eq!(graph.wait_steps_for("vm2"), vec!["wait-vm2"]);
    assert_eq!(graph.instance("vm1").unwrap().metadata[RUN_FILTER_KEY], "TestVm1");
    assert_eq!(graph.instance("vm2").unwrap().metadata[RUN_FILTER_KEY], "TestVm2");
    graph.validate().unwrap();
}

#[test]
fn test_unsupported_image_is_setup_failure() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp, &["windows-server-2019"]);
    let filter = Regex::new("oslogin").unwrap();
    let mut workflows = SuiteRegistry::with_builtin().build_workflows(&config.images, Some(&filter));

    let engine = MockEngine::new();
    let settings = config.finalize_settings();
    let finalizer = Finalizer::new(&settings, &engine, Arc::new(BufferedLogger::new()));
    finalizer.finalize_all(&mut workflows).unwrap();

    let collector = ResultCollector::new(Arc::new(FsObjectStore::new(temp.path())));
    let scheduler = Scheduler::new(&engine, &collector, 2).unwrap();
    let results = scheduler.run(workflows);

    let oslogin = results.iter().find(|r| r.name == "oslogin").unwrap();
    assert_eq!(oslogin.outcome, Outcome::SetupFailed);
    assert!(oslogin.payload.contains("windows-server-2019"));
    assert!(results
        .iter()
        .filter(|r| r.name != "oslogin")
        .all(|r| r.outcome == Outcome::Skipped));
    assert_eq!(engine.execute_count(), 0);
}

#[test]
fn test_full_run_collects_reports() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp, &["debian-10", "centos-7"]);
    let filter = Regex::new("^(ssh|image-validation)$").unwrap();
    let mut workflows = SuiteRegistry::with_builtin().build_workflows(&config.images, Some(&filter));

    let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(temp.path()));
    let engine = MockEngine::new().with_report(Arc::clone(&store), SSH_OUTPUT);
    let logger = Arc::new(BufferedLogger::new());
    let settings = config.finalize_settings();
    let finalizer = Finalizer::new(&settings, &engine, logger.clone());
    assert_eq!(finalizer.finalize_all(&mut workflows).unwrap(), 4);

    for workflow in workflows.iter().filter(|w| w.is_finalized()) {
        let destination = workflow.destination().unwrap().to_string();
        assert!(destination.starts_with(&format!("gs://results/runs/{}-run", workflow.name())));
        assert!(destination.ends_with("/outs/junit.xml"));
        for instance in workflow.graph().unwrap().instances() {
            assert_eq!(
                format!("{}/junit.xml", instance.metadata[OUTS_PATH_KEY]),
                destination
            );
        }
    }

    let collector = ResultCollector::new(Arc::clone(&store));
    let scheduler = Scheduler::new(&engine, &collector, config.parallel_count).unwrap();
    let summary = RunSummary::new(scheduler.run(workflows));

    assert_eq!(summary.results.len(), 8);
    let counts = summary.counts();
    assert_eq!(counts.workflow_success, 4);
    assert_eq!(counts.skipped, 4);
    assert!(summary.is_success());
    assert!(!logger.entries_for("ssh").is_empty());

    let ssh = summary
        .results
        .iter()
        .find(|r| r.name == "ssh" && r.image == "centos-7")
        .unwrap();
    let report = gtm_report::parse_junit_xml(&ssh.payload).unwrap();
    assert_eq!(report.counts().passed, 2);

    let out_path = temp.path().join("combined.xml");
    summary.write_junit(&out_path).unwrap();
    let combined = gtm_report::parse_junit_xml(&std::fs::read_to_string(&out_path).unwrap()).unwrap();
    assert_eq!(combined.packages.len(), 8);
    assert_eq!(combined.counts().failed, 0);
}

#[test]
fn test_engine_failure_fails_only_that_workflow() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp, &["debian-10"]);
    let mut workflows = SuiteRegistry::with_builtin().build_workflows(&config.images, None);

    let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(temp.path()));
    let engine = MockEngine::new()
        .with_report(Arc::clone(&store), SSH_OUTPUT)
        .fail_graph("shutdown-scripts", "wait-vm timed out");
    let settings = config.finalize_settings();
    Finalizer::new(&settings, &engine, Arc::new(BufferedLogger::new()))
        .finalize_all(&mut workflows)
        .unwrap();

    let collector = ResultCollector::new(store);
    let summary = RunSummary::new(Scheduler::new(&engine, &collector, 4).unwrap().run(workflows));

    let outcome = |name: &str| summary.results.iter().find(|r| r.name == name).unwrap().outcome;
    assert_eq!(outcome("shutdown-scripts"), Outcome::WorkflowFailed);
    assert_eq!(outcome("ssh"), Outcome::WorkflowSuccess);
    assert_eq!(outcome("image-validation"), Outcome::WorkflowSuccess);
    assert_eq!(outcome("oslogin"), Outcome::WorkflowSuccess);
    assert!(!summary.is_success());
}

#[test]
fn test_malformed_report_fails_only_that_workflow() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp, &["debian-10"]);
    let mut workflows = SuiteRegistry::with_builtin().build_workflows(&config.images, None);

    let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(temp.path()));
    let engine = MockEngine::new()
        .with_report(Arc::clone(&store), SSH_OUTPUT)
        .with_report_for("oslogin", "<testsuites><testsuite name=\"x\">");
    let settings = config.finalize_settings();
    Finalizer::new(&settings, &engine, Arc::new(BufferedLogger::new()))
        .finalize_all(&mut workflows)
        .unwrap();

    let collector = ResultCollector::new(store);
    let summary = RunSummary::new(Scheduler::new(&engine, &collector, 4).unwrap().run(workflows));

    let result = |name: &str| summary.results.iter().find(|r| r.name == name).unwrap();
    assert_eq!(result("oslogin").outcome, Outcome::WorkflowFailed);
    assert!(result("oslogin").payload.contains("unclosed testsuite"));
    for sibling in ["ssh", "image-validation", "shutdown-scripts"] {
        assert_eq!(result(sibling).outcome, Outcome::WorkflowSuccess);
    }
    assert_eq!(engine.execute_count(), 4);
}
