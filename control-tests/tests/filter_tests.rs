//! Selector expansion: services, groups and `all`

use control_core::config::Config;
use control_core::errors::ControlError;
use control_tests::{TestManifestBuilder, TestServiceBuilder};
use tempfile::TempDir;

fn shop(dir: &TempDir) -> Config {
    TestManifestBuilder::new("shop")
        .add_service("web", TestServiceBuilder::shell("true").daemon())
        .add_service("api", TestServiceBuilder::shell("true").daemon())
        .add_service("worker", TestServiceBuilder::shell("true").daemon())
        .add_service("cleanup", TestServiceBuilder::shell("true").periodic("1h"))
        .add_group("front", &["web", "api"])
        .add_group("back", &["worker", "cleanup"])
        .add_group("everything", &["front", "back"])
        .load_from(dir.path())
        .unwrap()
}

fn names(config: &Config, selectors: &[&str]) -> Vec<String> {
    config
        .resolve(selectors)
        .unwrap()
        .into_iter()
        .map(|s| s.name.clone())
        .collect()
}

#[test]
fn test_all_in_declaration_order() {
    let dir = TempDir::new().unwrap();
    let config = shop(&dir);
    assert_eq!(names(&config, &["all"]), vec!["web", "api", "worker", "cleanup"]);
}

#[test]
fn test_nested_groups_expand_in_member_order() {
    let dir = TempDir::new().unwrap();
    let config = shop(&dir);
    assert_eq!(
        names(&config, &["everything"]),
        vec!["web", "api", "worker", "cleanup"]
    );
    assert_eq!(names(&config, &["back", "web"]), vec!["worker", "cleanup", "web"]);
}

/// Selectors are a list: overlapping selectors repeat services
#[test]
fn test_overlapping_selectors_keep_duplicates() {
    let dir = TempDir::new().unwrap();
    let config = shop(&dir);
    assert_eq!(names(&config, &["web", "front"]), vec!["web", "web", "api"]);
}

#[test]
fn test_unknown_selector_selects_nothing() {
    let dir = TempDir::new().unwrap();
    let config = shop(&dir);
    assert!(names(&config, &["nope"]).is_empty());
    assert_eq!(names(&config, &["nope", "api"]), vec!["api"]);
}

#[test]
fn test_service_lookup() {
    let dir = TempDir::new().unwrap();
    let config = shop(&dir);
    assert_eq!(config.service("worker").unwrap().name, "worker");
    assert!(matches!(
        config.service("front").unwrap_err(),
        ControlError::ServiceNotFound(name) if name == "front"
    ));
}

#[test]
fn test_group_cycle_fails_the_load() {
    let dir = TempDir::new().unwrap();
    let err = TestManifestBuilder::new("shop")
        .add_service("web", TestServiceBuilder::shell("true"))
        .add_group("a", &["web", "b"])
        .add_group("b", &["a"])
        .load_from(dir.path())
        .unwrap_err();

    match err {
        ControlError::CyclicGroup(path) => assert_eq!(path, vec!["a", "b", "a"]),
        other => panic!("expected cyclic group error, got {}", other),
    }
}

#[test]
fn test_all_is_reserved() {
    let dir = TempDir::new().unwrap();
    let err = TestManifestBuilder::new("shop")
        .add_service("web", TestServiceBuilder::shell("true"))
        .add_group("all", &["web"])
        .load_from(dir.path())
        .unwrap_err();
    assert!(matches!(err, ControlError::Schema { .. }), "{}", err);
}
