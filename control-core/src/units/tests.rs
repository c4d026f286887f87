use super::*;
use crate::config::{CronSchedule, MANIFEST_VERSION, PeriodicSchedule, ResourceLimits};
use crate::exec::{Executable, ResolveError};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::path::PathBuf;

struct Calendar {
    rejected: Vec<&'static str>,
    seen: RefCell<Vec<String>>,
}

impl Calendar {
    fn accepting() -> Self {
        Self {
            rejected: vec![],
            seen: RefCell::new(vec![]),
        }
    }
}

impl CalendarValidator for Calendar {
    fn validate_calendar_expression(&self, expression: &str) -> Result<bool> {
        self.seen.borrow_mut().push(expression.to_string());
        Ok(!self.rejected.contains(&expression))
    }
}

fn service(name: &str, kind: ServiceKind) -> Service {
    Service {
        name: name.to_string(),
        kind,
        exec: Ok(Executable {
            args: vec!["/usr/bin/app".to_string(), "--port".to_string(), "80".to_string()],
            env: IndexMap::new(),
            cwd: PathBuf::from("/srv/app"),
        }),
        user: None,
        limits: ResourceLimits::default(),
        systemd: None,
        systemd_timer: None,
        syslog: None,
    }
}

fn config() -> Config {
    Config {
        name: "demo".to_string(),
        version: MANIFEST_VERSION.to_string(),
        path: PathBuf::from("/srv/app/control.yaml"),
        services: IndexMap::new(),
        groups: IndexMap::new(),
        env: IndexMap::new(),
        warnings: vec![],
    }
}

#[test]
fn test_plain_service_unit() {
    let config = config();
    let calendar = Calendar::accepting();
    let units = UnitSynthesizer::new(&config, &calendar)
        .synthesize(&service("web", ServiceKind::Plain))
        .unwrap();

    assert_eq!(
        units.service,
        "# created by control
# control.yaml=/srv/app/control.yaml

[Unit]
Description=demo-web
After=syslog.target network.target
StartLimitIntervalSec=0

[Service]
Type=simple
Restart=no
StandardOutput=journal
StandardError=journal
SyslogIdentifier=demo-web
User=root
ExecStart=/usr/bin/app --port 80
WorkingDirectory=/srv/app
"
    );
    assert_eq!(units.timer, None);
}

#[test]
fn test_daemon_service_unit() {
    let config = config();
    let calendar = Calendar::accepting();
    let mut svc = service("api", ServiceKind::Daemon);
    svc.user = Some("www".to_string());
    svc.syslog = Some("api-log".to_string());

    let text = UnitSynthesizer::new(&config, &calendar).service_unit(&svc).unwrap();
    assert!(text.contains("Restart=on-failure\nRestartSec=10\n"));
    assert!(text.contains("User=www\n"));
    assert!(text.contains("SyslogIdentifier=api-log\n"));
    assert!(text.ends_with("WorkingDirectory=/srv/app\n\n[Install]\nWantedBy=multi-user.target\n"));
}

#[test]
fn test_old_systemd_uses_legacy_start_limit() {
    let config = config();
    let calendar = Calendar::accepting();
    let svc = service("web", ServiceKind::Plain);

    let old = UnitSynthesizer::new(&config, &calendar)
        .with_manager_version(Some(244))
        .service_unit(&svc)
        .unwrap();
    assert!(old.contains("\nStartLimitInterval=0\n"));

    let new = UnitSynthesizer::new(&config, &calendar)
        .with_manager_version(Some(245))
        .service_unit(&svc)
        .unwrap();
    assert!(new.contains("\nStartLimitIntervalSec=0\n"));
}

#[test]
fn test_exec_start_quotes_and_escapes() {
    let config = config();
    let calendar = Calendar::accepting();
    let mut svc = service("sh", ServiceKind::Plain);
    svc.exec = Ok(Executable {
        args: vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            "echo $HOME done".to_string(),
        ],
        env: IndexMap::new(),
        cwd: PathBuf::from("/srv/app"),
    });

    let text = UnitSynthesizer::new(&config, &calendar).service_unit(&svc).unwrap();
    assert!(
        text.contains("\nExecStart=/bin/sh -c 'echo $$HOME done'\n"),
        "{}",
        text
    );
}

#[test]
fn test_environment_lines() {
    let config = config();
    let calendar = Calendar::accepting();
    let mut svc = service("web", ServiceKind::Plain);
    if let Ok(exec) = &mut svc.exec {
        exec.env.insert("PORT".to_string(), "8080".to_string());
        exec.env.insert("GREETING".to_string(), "hello world".to_string());
        exec.env.insert("RATE".to_string(), "50%".to_string());
    }

    let text = UnitSynthesizer::new(&config, &calendar).service_unit(&svc).unwrap();
    assert!(text.contains(
        "\nEnvironment=PORT=8080\nEnvironment=\"GREETING=hello world\"\nEnvironment=RATE=50%%\n"
    ));
}

#[test]
fn test_working_directory_escapes_specifiers() {
    let config = config();
    let calendar = Calendar::accepting();
    let mut svc = service("web", ServiceKind::Plain);
    if let Ok(exec) = &mut svc.exec {
        exec.cwd = PathBuf::from("/srv/100%done");
    }

    let text = UnitSynthesizer::new(&config, &calendar).service_unit(&svc).unwrap();
    assert!(text.contains("\nWorkingDirectory=/srv/100%%done\n"), "{}", text);
}

#[test]
fn test_limits_and_passthrough() {
    let config = config();
    let calendar = Calendar::accepting();
    let mut svc = service("web", ServiceKind::Plain);
    svc.limits = ResourceLimits {
        max_cpu: Some("50%".to_string()),
        max_memory: None,
        max_time: Some("60".to_string()),
        nofile: Some("4096".to_string()),
    };
    svc.systemd = Some("Nice=5".to_string());

    let text = UnitSynthesizer::new(&config, &calendar).service_unit(&svc).unwrap();
    assert!(text.ends_with(
        "WorkingDirectory=/srv/app\nCPUQuota=50%\nRuntimeMaxSec=60\nLimitNOFILE=4096\nNice=5\n"
    ));
    assert!(!text.contains("MemoryMax"));
}

#[test]
fn test_unresolved_executable_fails_synthesis() {
    let config = config();
    let calendar = Calendar::accepting();
    let mut svc = service("web", ServiceKind::Plain);
    svc.exec = Err(ResolveError::ExecutableNotFound(PathBuf::from("/nope")));

    let err = UnitSynthesizer::new(&config, &calendar).synthesize(&svc).unwrap_err();
    assert!(matches!(err, ControlError::ExecutableNotFound { .. }), "{}", err);
}

#[test]
fn test_periodic_timer() {
    let config = config();
    let calendar = Calendar::accepting();
    let svc = service(
        "job",
        ServiceKind::Periodic(PeriodicSchedule {
            interval: Some("1h".to_string()),
            first_interval: None,
            random_delay: Some("30".to_string()),
        }),
    );

    let units = UnitSynthesizer::new(&config, &calendar).synthesize(&svc).unwrap();
    assert!(!units.service.contains("[Install]"));
    assert_eq!(
        units.timer.unwrap(),
        "# created by control
# control.yaml=/srv/app/control.yaml

[Unit]
Description=demo-job

[Timer]
OnActiveSec=1h
OnUnitActiveSec=1h
RandomizedDelaySec=30

[Install]
WantedBy=timers.target
"
    );
}

#[test]
fn test_periodic_first_interval() {
    let config = config();
    let calendar = Calendar::accepting();
    let svc = service(
        "job",
        ServiceKind::Periodic(PeriodicSchedule {
            interval: Some("1h".to_string()),
            first_interval: Some("5m".to_string()),
            random_delay: None,
        }),
    );

    let timer = UnitSynthesizer::new(&config, &calendar).timer_unit(&svc).unwrap().unwrap();
    assert!(timer.contains("\nOnActiveSec=5m\nOnUnitActiveSec=1h\n"));
    assert!(!timer.contains("RandomizedDelaySec"));
}

#[test]
fn test_periodic_without_interval_has_no_timer() {
    let config = config();
    let calendar = Calendar::accepting();
    let svc = service("job", ServiceKind::Periodic(PeriodicSchedule::default()));
    assert_eq!(
        UnitSynthesizer::new(&config, &calendar).timer_unit(&svc).unwrap(),
        None
    );
}

#[test]
fn test_cron_timer_validates_each_expression() {
    let config = config();
    let calendar = Calendar::accepting();
    let mut svc = service(
        "nightly",
        ServiceKind::Cron(CronSchedule {
            expressions: vec!["*-*-* 02:00".to_string(), "weekly".to_string()],
            random_delay: None,
        }),
    );
    svc.systemd_timer = Some("Persistent=true\n".to_string());

    let timer = UnitSynthesizer::new(&config, &calendar).timer_unit(&svc).unwrap().unwrap();
    assert!(timer.contains(
        "[Timer]\nOnCalendar=*-*-* 02:00\nOnCalendar=weekly\nPersistent=true\n\n[Install]\n"
    ));
    assert_eq!(*calendar.seen.borrow(), vec!["*-*-* 02:00", "weekly"]);
}

#[test]
fn test_rejected_calendar_expression() {
    let config = config();
    let calendar = Calendar {
        rejected: vec!["every tuesday"],
        seen: RefCell::new(vec![]),
    };
    let svc = service(
        "nightly",
        ServiceKind::Cron(CronSchedule {
            expressions: vec!["daily".to_string(), "every tuesday".to_string()],
            random_delay: None,
        }),
    );

    let err = UnitSynthesizer::new(&config, &calendar).synthesize(&svc).unwrap_err();
    match err {
        ControlError::InvalidCalendar { service, expression } => {
            assert_eq!(service, "nightly");
            assert_eq!(expression, "every tuesday");
        }
        other => panic!("expected InvalidCalendar, got {}", other),
    }
}

#[test]
fn test_synthesis_is_deterministic() {
    let config = config();
    let calendar = Calendar::accepting();
    let mut svc = service("web", ServiceKind::Daemon);
    if let Ok(exec) = &mut svc.exec {
        for i in 0..20 {
            exec.env.insert(format!("VAR_{}", i), i.to_string());
        }
    }

    let synth = UnitSynthesizer::new(&config, &calendar);
    assert_eq!(synth.synthesize(&svc).unwrap(), synth.synthesize(&svc).unwrap());
}

#[test]
fn test_ownership_detection_is_exact_line() {
    let manifest = Path::new("/srv/a/control.yaml");
    let unit = format!("{}\n{}\n\n[Unit]\n", GENERATED_BY, ownership_marker(manifest));
    assert!(is_owned_by(&unit, manifest));
    assert!(!is_owned_by(&unit, Path::new("/srv/a/control.yml")));
    assert!(!is_owned_by(&unit, Path::new("/srv/a")));
}

#[test]
fn test_unit_names() {
    let config = config();
    let svc = service("web", ServiceKind::Daemon);
    assert_eq!(unit_name(&config, &svc, UnitKind::Service), "demo-web.service");
    assert_eq!(unit_name(&config, &svc, UnitKind::Timer), "demo-web.timer");
    assert_eq!(UnitKind::of("demo-web.timer"), Some(UnitKind::Timer));
    assert_eq!(UnitKind::of("demo-web.socket"), None);
}
