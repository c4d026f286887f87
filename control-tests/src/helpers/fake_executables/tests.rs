use super::*;
use tempfile::TempDir;

#[test]
fn test_script_is_executable() {
    let dir = TempDir::new().unwrap();
    let fakes = FakeExecutables::new(dir.path());
    let path = fakes.script("bin/tool", "exit 0").unwrap();

    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);
    assert!(std::fs::read_to_string(&path).unwrap().starts_with("#!/bin/sh\n"));
}

#[test]
fn test_plain_file_is_not_executable() {
    let dir = TempDir::new().unwrap();
    let fakes = FakeExecutables::new(dir.path());
    let path = fakes.plain_file("data.txt").unwrap();

    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o111, 0);
}

#[test]
fn test_canonical_of_missing_file_is_joined_path() {
    let dir = TempDir::new().unwrap();
    let fakes = FakeExecutables::new(dir.path());
    assert_eq!(fakes.canonical("missing"), dir.path().join("missing"));
}
