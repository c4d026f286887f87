//! Unit synthesis from manifests on disk

use control_core::config::Config;
use control_core::errors::ControlError;
use control_core::lifecycle::Lifecycle;
use control_core::units::{UnitKind, UnitSynthesizer, is_owned_by, ownership_marker, unit_name};
use control_tests::{FakeExecutables, TestManifestBuilder, TestServiceBuilder, UnitDirSupervisor};
use tempfile::TempDir;

struct Fixture {
    project: TempDir,
    units: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let project = TempDir::new().unwrap();
        FakeExecutables::new(project.path())
            .script("server", "exec sleep 3600")
            .unwrap();
        Self {
            project,
            units: TempDir::new().unwrap(),
        }
    }

    fn load(&self, builder: TestManifestBuilder) -> Config {
        builder.load_from(self.project.path()).unwrap()
    }

    fn supervisor(&self) -> UnitDirSupervisor {
        UnitDirSupervisor::new(self.units.path())
    }
}

fn lines(text: &str) -> Vec<&str> {
    text.lines().collect()
}

#[test]
fn test_daemon_unit() {
    let fx = Fixture::new();
    let config = fx.load(
        TestManifestBuilder::new("shop").add_service(
            "web",
            TestServiceBuilder::run("./server --port 80")
                .daemon()
                .with_env("PORT", "80")
                .with_user("www-data")
                .with("max_memory", "1G"),
        ),
    );
    let supervisor = fx.supervisor();
    let units = UnitSynthesizer::new(&config, &supervisor)
        .synthesize(&config.services["web"])
        .unwrap();

    assert!(units.timer.is_none());
    let text = units.service;
    let lines = lines(&text);
    assert_eq!(lines[0], "# created by control");
    assert_eq!(lines[1], ownership_marker(&config.path));
    assert!(is_owned_by(&text, &config.path));

    for expected in [
        "[Unit]",
        "Description=shop-web",
        "[Service]",
        "Type=simple",
        "Restart=on-failure",
        "RestartSec=10",
        "SyslogIdentifier=shop-web",
        "User=www-data",
        "Environment=PORT=80",
        "MemoryMax=1G",
        "[Install]",
        "WantedBy=multi-user.target",
    ] {
        assert!(lines.contains(&expected), "missing {:?} in\n{}", expected, text);
    }
    let exec_start = lines
        .iter()
        .find(|l| l.starts_with("ExecStart="))
        .unwrap();
    assert!(exec_start.contains("server"), "{}", exec_start);
    assert!(exec_start.ends_with(" --port 80"), "{}", exec_start);

    let position = |line: &str| lines.iter().position(|l| *l == line).unwrap();
    assert!(position("[Unit]") < position("[Service]"));
    assert!(position("[Service]") < position("[Install]"));
}

#[test]
fn test_plain_unit_is_not_installable() {
    let fx = Fixture::new();
    let config = fx.load(
        TestManifestBuilder::new("shop").add_service("once", TestServiceBuilder::run("./server")),
    );
    let supervisor = fx.supervisor();
    let text = UnitSynthesizer::new(&config, &supervisor)
        .service_unit(&config.services["once"])
        .unwrap();

    assert!(text.contains("Restart=no\n"));
    assert!(!text.contains("[Install]"));
    assert!(text.contains("User=root\n"));
}

#[test]
fn test_cron_timer() {
    let fx = Fixture::new();
    let config = fx.load(
        TestManifestBuilder::new("shop").add_service(
            "report",
            TestServiceBuilder::run("./server")
                .with("type", "cron")
                .with(
                    "cron",
                    serde_yaml::Value::Sequence(vec!["Mon *-*-* 06:00".into(), "daily".into()]),
                )
                .with("random_delay", "5m"),
        ),
    );
    let supervisor = fx.supervisor();
    let timer = UnitSynthesizer::new(&config, &supervisor)
        .timer_unit(&config.services["report"])
        .unwrap()
        .unwrap();

    assert!(timer.contains("[Timer]\nOnCalendar=Mon *-*-* 06:00\nOnCalendar=daily\nRandomizedDelaySec=5m\n"));
    assert!(timer.ends_with("[Install]\nWantedBy=timers.target\n"));
    assert!(is_owned_by(&timer, &config.path));
}

#[test]
fn test_rejected_calendar_expression() {
    let fx = Fixture::new();
    let config = fx.load(
        TestManifestBuilder::new("shop")
            .add_service("report", TestServiceBuilder::run("./server").cron("every tuesday")),
    );
    let supervisor = fx.supervisor();
    supervisor.reject_calendar("every tuesday");

    let err = UnitSynthesizer::new(&config, &supervisor)
        .synthesize(&config.services["report"])
        .unwrap_err();
    match err {
        ControlError::InvalidCalendar {
            service,
            expression,
        } => {
            assert_eq!(service, "report");
            assert_eq!(expression, "every tuesday");
        }
        other => panic!("expected invalid calendar, got {}", other),
    }
}

#[test]
fn test_periodic_timer_with_passthrough() {
    let fx = Fixture::new();
    let config = fx.load(
        TestManifestBuilder::new("shop").add_service(
            "tick",
            TestServiceBuilder::run("./server")
                .periodic("15m")
                .with("first_interval", "1m")
                .with("systemd_timer", "Persistent=true"),
        ),
    );
    let supervisor = fx.supervisor();
    let timer = UnitSynthesizer::new(&config, &supervisor)
        .timer_unit(&config.services["tick"])
        .unwrap()
        .unwrap();

    assert!(timer.contains("[Timer]\nOnActiveSec=1m\nOnUnitActiveSec=15m\nPersistent=true\n"));
}

/// Old systemd releases get the legacy start limit directive
#[tokio::test]
async fn test_synthesis_follows_manager_version() {
    let fx = Fixture::new();
    let config = fx.load(
        TestManifestBuilder::new("shop")
            .add_service("web", TestServiceBuilder::run("./server").daemon()),
    );
    let web = &config.services["web"];

    let old = fx.supervisor().with_version(Some(219));
    let text = Lifecycle::new(&config, &old).synthesize(web).await.unwrap().service;
    assert!(text.contains("\nStartLimitInterval=0\n"), "{}", text);

    let current = fx.supervisor().with_version(Some(255));
    let text = Lifecycle::new(&config, &current).synthesize(web).await.unwrap().service;
    assert!(text.contains("\nStartLimitIntervalSec=0\n"), "{}", text);

    let unknown = fx.supervisor().with_version(None);
    let text = Lifecycle::new(&config, &unknown).synthesize(web).await.unwrap().service;
    assert!(text.contains("\nStartLimitIntervalSec=0\n"), "{}", text);
}

#[test]
fn test_unit_names_and_determinism() {
    let fx = Fixture::new();
    let config = fx.load(
        TestManifestBuilder::new("shop")
            .add_service("tick", TestServiceBuilder::run("./server").periodic("1h")),
    );
    let tick = &config.services["tick"];
    assert_eq!(unit_name(&config, tick, UnitKind::Service), "shop-tick.service");
    assert_eq!(unit_name(&config, tick, UnitKind::Timer), "shop-tick.timer");

    let supervisor = fx.supervisor();
    let synthesizer = UnitSynthesizer::new(&config, &supervisor);
    assert_eq!(synthesizer.synthesize(tick).unwrap(), synthesizer.synthesize(tick).unwrap());
}

/// Ownership is per manifest path, not per manifest name
#[test]
fn test_same_name_different_manifest_not_owned() {
    let fx = Fixture::new();
    let config = fx.load(
        TestManifestBuilder::new("shop").add_service("web", TestServiceBuilder::run("./server")),
    );
    let supervisor = fx.supervisor();
    let text = UnitSynthesizer::new(&config, &supervisor)
        .service_unit(&config.services["web"])
        .unwrap();

    let elsewhere = config.path.with_file_name("other.yaml");
    assert!(!is_owned_by(&text, &elsewhere));
    let prefix_of_path = config.dir().to_path_buf();
    assert!(!is_owned_by(&text, &prefix_of_path));
}
