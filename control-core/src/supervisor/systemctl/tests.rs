use super::*;
use tempfile::TempDir;

fn backend(dir: &TempDir) -> Systemctl {
    Systemctl::new()
        .with_unit_dir(dir.path())
        .with_elevation(false)
}

#[test]
fn test_parse_manager_version() {
    assert_eq!(
        parse_manager_version("systemd 252 (252.22-1~deb12u1)\n+PAM +AUDIT\n"),
        Some(252)
    );
    assert_eq!(parse_manager_version("systemd 244\n"), Some(244));
    assert_eq!(parse_manager_version(""), None);
    assert_eq!(parse_manager_version("something else entirely"), None);
}

#[test]
fn test_command_line() {
    assert_eq!(
        command_line("systemctl", &["is-active", "demo-web.service"]),
        "systemctl is-active demo-web.service"
    );
}

#[tokio::test]
async fn test_unit_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let backend = backend(&dir);

    assert_eq!(backend.read_unit("demo-web.service").await.unwrap(), None);
    backend
        .write_unit("demo-web.service", "[Unit]\n")
        .await
        .unwrap();
    assert_eq!(
        backend.read_unit("demo-web.service").await.unwrap().as_deref(),
        Some("[Unit]\n")
    );

    backend.delete_unit("demo-web.service").await.unwrap();
    assert_eq!(backend.read_unit("demo-web.service").await.unwrap(), None);
}

#[tokio::test]
async fn test_delete_missing_unit_is_ok() {
    let dir = TempDir::new().unwrap();
    backend(&dir).delete_unit("nothing.service").await.unwrap();
}

#[tokio::test]
async fn test_list_only_service_and_timer_files() {
    let dir = TempDir::new().unwrap();
    for name in ["b.timer", "a.service", "c.socket", "notes.txt"] {
        std::fs::write(dir.path().join(name), "").unwrap();
    }
    std::fs::create_dir(dir.path().join("multi-user.target.wants")).unwrap();
    std::fs::create_dir(dir.path().join("dir.service")).unwrap();

    let names = backend(&dir).list_all_unit_names().await.unwrap();
    assert_eq!(names, vec!["a.service", "b.timer"]);
}
