use super::*;
use tempfile::TempDir;

#[test]
fn test_manifest_builder_yaml() {
    let yaml = TestManifestBuilder::new("demo")
        .with_var("port", "8080")
        .add_service("web", TestServiceBuilder::run("sleep 1").daemon())
        .add_group("backend", &["web"])
        .to_yaml();

    let value: Value = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(value["name"], Value::from("demo"));
    assert_eq!(value["version"], Value::from(MANIFEST_VERSION));
    assert_eq!(value["env"]["port"], Value::from("8080"));
    assert_eq!(value["services"]["web"]["run"], Value::from("sleep 1"));
    assert_eq!(value["services"]["web"]["type"], Value::from("daemon"));
    assert_eq!(value["groups"]["backend"][0], Value::from("web"));
}

#[test]
fn test_service_builder_env_accumulates() {
    let service = TestServiceBuilder::cmd("sleep", &["1"])
        .with_env("A", "1")
        .with_env("B", "2")
        .build();
    let env = service["env"].as_mapping().unwrap();
    assert_eq!(env.len(), 2);
    assert_eq!(service["args"][0], Value::from("1"));
}

#[test]
fn test_load_from_writes_control_yaml() {
    let dir = TempDir::new().unwrap();
    let config = TestManifestBuilder::new("demo")
        .add_service("job", TestServiceBuilder::shell("true"))
        .load_from(dir.path())
        .unwrap();

    assert!(dir.path().join("control.yaml").is_file());
    assert_eq!(config.name, "demo");
    assert!(config.services.contains_key("job"));
}
