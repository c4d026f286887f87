use super::*;
use tempfile::TempDir;

#[tokio::test]
async fn test_units_are_real_files() {
    let dir = TempDir::new().unwrap();
    let supervisor = UnitDirSupervisor::new(dir.path());

    supervisor.write_unit("a-b.service", "[Unit]\n").await.unwrap();
    assert_eq!(supervisor.unit("a-b.service").as_deref(), Some("[Unit]\n"));
    assert_eq!(supervisor.unit_files(), vec!["a-b.service"]);
    assert_eq!(supervisor.write_count(), 1);

    supervisor.delete_unit("a-b.service").await.unwrap();
    assert!(supervisor.unit_files().is_empty());
}

#[tokio::test]
async fn test_start_requires_unit_file() {
    let dir = TempDir::new().unwrap();
    let supervisor = UnitDirSupervisor::new(dir.path());

    assert!(supervisor.start("a-b.service").await.is_err());
    assert_eq!(
        supervisor.is_active("a-b.service").await.unwrap(),
        ActiveState::Unknown
    );

    supervisor.write_unit("a-b.service", "").await.unwrap();
    supervisor.start("a-b.service").await.unwrap();
    assert_eq!(
        supervisor.is_active("a-b.service").await.unwrap(),
        ActiveState::Active
    );
}

#[test]
fn test_calendar_rejection() {
    let dir = TempDir::new().unwrap();
    let supervisor = UnitDirSupervisor::new(dir.path());
    supervisor.reject_calendar("bogus");

    assert!(!supervisor.validate_calendar_expression("bogus").unwrap());
    assert!(supervisor.validate_calendar_expression("daily").unwrap());
}
