use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod credentials;
mod runner;

use config::{AppConfig, DEFAULT_PROFILE, ProfileConfig};
use credentials::Credentials;
use runner::BatchOutcome;

#[derive(Parser, PartialEq, Debug)]
#[command(name = "shellwright")]
#[command(about = "Run commands on a remote host through one interactive shell", long_about = None)]
struct Cli {
    /// Host profile from the config file
    #[arg(long = "profile", env = "SHELLWRIGHT_PROFILE", default_value = DEFAULT_PROFILE)]
    profile: String,

    /// Path to the config file (default: ~/.shellwright/config.toml)
    #[arg(long = "config")]
    config_path: Option<PathBuf>,

    /// Remote host
    #[arg(long = "host")]
    host: Option<String>,

    /// SSH port
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,

    /// Login user
    #[arg(short = 'u', long = "user")]
    user: Option<String>,

    /// Private key file
    #[arg(short = 'i', long = "key")]
    key: Option<String>,

    /// Ask for the login password instead of using a key
    #[arg(long = "ask-password", default_value_t = false)]
    ask_password: bool,

    /// Prefix every command with sudo
    #[arg(long = "sudo", default_value_t = false)]
    sudo: bool,

    /// Switch to this user with `su -` after connecting
    #[arg(long = "switch-user")]
    switch_user: Option<String>,

    /// Maximum execution time of each command, e.g. "2h" or "90s"
    #[arg(long = "max-execution-time", value_parser = humantime::parse_duration)]
    max_execution_time: Option<Duration>,

    /// Maximum time a command may go without output, e.g. "15m"
    #[arg(long = "max-inactivity-time", value_parser = humantime::parse_duration)]
    max_inactivity_time: Option<Duration>,

    /// Read further commands from a file, one per line
    #[arg(short = 's', long = "script")]
    script: Option<PathBuf>,

    /// Do not echo commands and their output
    #[arg(short = 'q', long = "quiet", default_value_t = false)]
    quiet: bool,

    /// Store the connection flags in the selected profile and exit
    #[arg(long = "save", default_value_t = false)]
    save: bool,

    /// List the configured profiles and exit
    #[arg(long = "list-profiles", default_value_t = false)]
    list_profiles: bool,

    /// Enable debug output
    #[arg(long = "debug", default_value_t = false)]
    debug: bool,

    /// Commands to run, in order
    commands: Vec<String>,
}

impl Cli {
    fn overrides(&self) -> ProfileConfig {
        ProfileConfig {
            host: self.host.clone(),
            port: self.port,
            username: self.user.clone(),
            private_key_path: self.key.clone(),
            max_execution_time: self.max_execution_time,
            max_inactivity_time: self.max_inactivity_time,
            settle_delay: None,
            sudo: self.sudo.then_some(true),
            switch_user: self.switch_user.clone(),
            switch_user_sudo: None,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.debug {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| format!("error,{}=debug,shellwright_session=debug", env!("CARGO_CRATE_NAME")).into()),
            )
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    if cli.list_profiles {
        match AppConfig::list_available_profiles(cli.config_path.as_ref()) {
            Ok(profiles) => profiles.iter().for_each(|profile| println!("{}", profile)),
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    if cli.save {
        match AppConfig::save_profile(&cli.profile, cli.config_path.as_ref(), cli.overrides()) {
            Ok(path) => println!("Profile '{}' saved to {}", cli.profile, path.display()),
            Err(e) => {
                eprintln!("Failed to save profile: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let config = match AppConfig::load(&cli.profile, cli.config_path.as_ref(), cli.overrides()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let script = match cli.script.as_deref() {
        Some(path) => match runner::read_script(path).await {
            Ok(script) => Some(script),
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        },
        None => None,
    };
    let commands = runner::collect_commands(&cli.commands, script.as_deref());
    if commands.is_empty() {
        eprintln!("Nothing to run, pass commands as arguments or with --script");
        std::process::exit(2);
    }

    let target = format!("{}@{}", config.username, config.host);
    let credentials = match Credentials::resolve(cli.ask_password, &target) {
        Ok(credentials) => credentials,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let session = match runner::session_builder(&config, credentials).build() {
        Ok(session) => session,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    let mut shell = runner::remote_shell(&config, session);

    match runner::run_batch(&mut shell, &commands, &config, cli.quiet).await {
        Ok(BatchOutcome::Completed(exit_code)) => std::process::exit(exit_code),
        Ok(BatchOutcome::Stopped { command, exit_code }) => {
            eprintln!("Command '{}' exited with status {}", command, exit_code);
            std::process::exit(exit_code);
        }
        Err(e) => {
            eprintln!("Ops! something went wrong: {}", e);
            std::process::exit(1);
        }
    }
}
