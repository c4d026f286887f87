use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the parsed configuration as YAML
    Dump,

    /// Print the configuration name, the prefix of all unit names
    Prefix,

    /// Run a service in the foreground, outside systemd
    Run {
        name: String,

        /// Start from an empty environment instead of inheriting ours
        #[arg(long)]
        clear_env: bool,
    },

    /// Write unit files, reload systemd and enable
    Install {
        /// Services or groups ("all" for every service)
        #[arg(required = true, value_name = "NAME")]
        names: Vec<String>,
    },

    /// Stop, disable and remove unit files
    Uninstall {
        /// Services or groups. Without names, every unit generated from this
        /// configuration is removed, including services no longer declared.
        #[arg(value_name = "NAME")]
        names: Vec<String>,
    },

    /// Start services
    Start {
        #[arg(required = true, value_name = "NAME")]
        names: Vec<String>,
    },

    /// Stop services
    Stop {
        #[arg(required = true, value_name = "NAME")]
        names: Vec<String>,
    },

    /// Restart services
    Restart {
        #[arg(required = true, value_name = "NAME")]
        names: Vec<String>,
    },

    /// Ask services to reload their configuration
    Reload {
        #[arg(required = true, value_name = "NAME")]
        names: Vec<String>,
    },

    /// Enable services (daemons start at boot, timers are armed)
    Enable {
        #[arg(required = true, value_name = "NAME")]
        names: Vec<String>,
    },

    /// Disable services
    Disable {
        #[arg(required = true, value_name = "NAME")]
        names: Vec<String>,
    },

    /// Exit 0 if the service is running, 1 otherwise
    IsStarted { name: String },

    /// Exit 0 if the service is enabled, 1 otherwise
    IsEnabled { name: String },

    /// Show enable and run state of services (all if none given)
    Status {
        #[arg(value_name = "NAME")]
        names: Vec<String>,

        /// Also print the full systemd status of each service
        #[arg(long)]
        full: bool,
    },

    /// Status as JSON, keyed by service name
    Json {
        #[arg(value_name = "NAME")]
        names: Vec<String>,
    },

    /// Show service logs (all if none given)
    Log {
        #[arg(value_name = "NAME")]
        names: Vec<String>,

        /// Keep streaming until interrupted or one of the log streams ends
        #[arg(short, long)]
        follow: bool,
    },
}

/// Commands that apply one operation to each selected service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Install,
    Uninstall,
    Start,
    Stop,
    Restart,
    Reload,
    Enable,
    Disable,
}

impl Action {
    pub fn verb(self) -> &'static str {
        match self {
            Action::Install => "install",
            Action::Uninstall => "uninstall",
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Restart => "restart",
            Action::Reload => "reload",
            Action::Enable => "enable",
            Action::Disable => "disable",
        }
    }

    /// Past tense, for reporting what was done
    pub fn done(self) -> &'static str {
        match self {
            Action::Install => "Installed",
            Action::Uninstall => "Uninstalled",
            Action::Start => "Started",
            Action::Stop => "Stopped",
            Action::Restart => "Restarted",
            Action::Reload => "Reloaded",
            Action::Enable => "Enabled",
            Action::Disable => "Disabled",
        }
    }
}
