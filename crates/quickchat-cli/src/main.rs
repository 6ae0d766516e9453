//! QuickChat CLI - sign in, inspect the session and watch who is online.
//!
//! A thin front-end over `quickchat-core`: every command builds a
//! `SessionManager` from the config, runs one operation and prints the
//! notices it produces.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use quickchat_core::{
    AuthMode, Config, Credentials, NoticeKind, Outcome, ProfilePatch, SessionManager,
    SessionSnapshot,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// Constants
// ============================================================================

/// Directory for a rolling log file in addition to stderr
const ENV_LOG_DIR: &str = "QUICKCHAT_LOG_DIR";

/// Password for non-interactive use (scripts, CI)
const ENV_PASSWORD: &str = "QUICKCHAT_PASSWORD";

const LOG_FILE_PREFIX: &str = "quickchat.log";

const USAGE: &str = "\
Usage: quickchat <command>

Commands:
  login <email>                       Sign in (prompts for password)
  signup <email> <full name>          Create an account (prompts for password)
  logout                              Forget the stored session
  whoami                              Validate the stored session and show the profile
  update-profile [--name N] [--bio B] [--pic URL]
                                      Change profile fields
  watch                               Print the online roster and server events (Ctrl-C to stop)

Environment:
  QUICKCHAT_BACKEND_URL    Backend base URL (default http://localhost:5000)
  QUICKCHAT_TOKEN_STORAGE  file | keyring
  QUICKCHAT_PASSWORD       Password for login/signup without prompting
  QUICKCHAT_LOG_DIR        Also write logs to a daily file in this directory
  RUST_LOG                 Log filter (default warn)";

#[derive(Debug, PartialEq)]
enum Command {
    Login { email: String },
    Signup { email: String, full_name: String },
    Logout,
    WhoAmI,
    UpdateProfile(ProfilePatch),
    Watch,
}

/// Initialize the tracing subscriber for logging.
/// The returned guard must live until exit so buffered file logs get flushed.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr));

    match std::env::var_os(ENV_LOG_DIR) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}

fn parse_args(args: &[String]) -> Result<Command> {
    let (command, rest) = args
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("Missing command"))?;

    match command.as_str() {
        "login" => match rest {
            [email] => Ok(Command::Login { email: email.clone() }),
            _ => Err(anyhow::anyhow!("Usage: quickchat login <email>")),
        },
        "signup" => match rest {
            [email, name @ ..] if !name.is_empty() => Ok(Command::Signup {
                email: email.clone(),
                full_name: name.join(" "),
            }),
            _ => Err(anyhow::anyhow!("Usage: quickchat signup <email> <full name>")),
        },
        "logout" => Ok(Command::Logout),
        "whoami" => Ok(Command::WhoAmI),
        "update-profile" => {
            let mut patch = ProfilePatch::default();
            let mut iter = rest.iter();
            while let Some(flag) = iter.next() {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("Missing value for {}", flag))?;
                match flag.as_str() {
                    "--name" => patch.full_name = Some(value.clone()),
                    "--bio" => patch.bio = Some(value.clone()),
                    "--pic" => patch.profile_pic = Some(value.clone()),
                    other => return Err(anyhow::anyhow!("Unknown option: {}", other)),
                }
            }
            if patch.is_empty() {
                return Err(anyhow::anyhow!("Nothing to update"));
            }
            Ok(Command::UpdateProfile(patch))
        }
        "watch" => Ok(Command::Watch),
        other => Err(anyhow::anyhow!("Unknown command: {}", other)),
    }
}

fn read_password() -> Result<String> {
    if let Ok(password) = std::env::var(ENV_PASSWORD) {
        return Ok(password);
    }
    rpassword::prompt_password("Password: ").context("Failed to read password")
}

fn print_notice(kind: NoticeKind, text: &str) {
    match kind {
        NoticeKind::Success => eprintln!("✓ {}", text),
        NoticeKind::Error => eprintln!("✗ {}", text),
    }
}

fn print_profile(snapshot: &SessionSnapshot) {
    match snapshot.user {
        Some(ref user) => {
            println!("{} ({})", user.display_name(), user.id);
            if let Some(ref email) = user.email {
                println!("  email: {}", email);
            }
            if let Some(ref bio) = user.bio {
                println!("  bio:   {}", bio);
            }
        }
        None => println!("Not logged in"),
    }
}

fn exit_code(outcome: &Outcome) -> ExitCode {
    match outcome {
        Outcome::Applied => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    }
}

async fn watch_roster(manager: &SessionManager) -> Result<()> {
    let mut updates = manager.subscribe();
    let mut server_events = manager.subscribe_events();
    let mut last: Option<Vec<String>> = None;

    loop {
        {
            let snapshot = updates.borrow_and_update();
            if snapshot.user.is_none() {
                println!("Session ended");
                return Ok(());
            }
            if last.as_ref() != Some(&snapshot.online_users) {
                println!(
                    "[{:?}] online ({}): {}",
                    snapshot.presence,
                    snapshot.online_users.len(),
                    snapshot.online_users.join(", ")
                );
                last = Some(snapshot.online_users.clone());
            }
        }

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            event = server_events.recv() => match event {
                Ok(event) => println!("event {}: {:?}", event.name, event.args),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Missed server events"),
                Err(RecvError::Closed) => return Ok(()),
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                debug!("Interrupted");
                return Ok(());
            }
        }
    }
}

async fn run(command: Command) -> Result<ExitCode> {
    let mut config = Config::load().context("Failed to load config")?;
    // Only `watch` needs the live channel
    if command != Command::Watch {
        config.presence.enabled = false;
    }

    let manager = SessionManager::from_config(&config)?.with_notifier(Arc::new(print_notice));
    debug!(backend = %config.backend_url, "Session manager ready");

    let code = match command {
        Command::Login { email } => {
            let password = read_password()?;
            let outcome = manager
                .login(AuthMode::Login, &Credentials::login(email, password))
                .await;
            exit_code(&outcome)
        }
        Command::Signup { email, full_name } => {
            let password = read_password()?;
            let outcome = manager
                .login(
                    AuthMode::Signup,
                    &Credentials::signup(email, password, full_name),
                )
                .await;
            exit_code(&outcome)
        }
        Command::Logout => {
            manager.logout();
            ExitCode::SUCCESS
        }
        Command::WhoAmI => {
            manager.initialize().await;
            print_profile(&manager.snapshot());
            if manager.is_authenticated() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Command::UpdateProfile(patch) => {
            manager.initialize().await;
            if !manager.is_authenticated() {
                println!("Not logged in");
                return Ok(ExitCode::FAILURE);
            }
            let outcome = manager.update_profile(&patch).await;
            if outcome == Outcome::Applied {
                print_profile(&manager.snapshot());
            }
            exit_code(&outcome)
        }
        Command::Watch => {
            manager.initialize().await;
            if !manager.is_authenticated() {
                println!("Not logged in");
                return Ok(ExitCode::FAILURE);
            }
            print_profile(&manager.snapshot());
            watch_roster(&manager).await?;
            ExitCode::SUCCESS
        }
    };

    Ok(code)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() || args[0] == "--help" || args[0] == "-h" {
        println!("{}", USAGE);
        return Ok(ExitCode::SUCCESS);
    }

    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("Error: {}\n\n{}", e, USAGE);
            return Ok(ExitCode::from(2));
        }
    };

    let _log_guard = init_tracing();
    info!("QuickChat CLI starting");

    run(command).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_login_and_signup() {
        assert_eq!(
            parse_args(&args(&["login", "ada@example.com"])).unwrap(),
            Command::Login { email: "ada@example.com".into() }
        );
        assert_eq!(
            parse_args(&args(&["signup", "ada@example.com", "Ada", "Lovelace"])).unwrap(),
            Command::Signup {
                email: "ada@example.com".into(),
                full_name: "Ada Lovelace".into(),
            }
        );
        assert!(parse_args(&args(&["login"])).is_err());
        assert!(parse_args(&args(&["signup", "ada@example.com"])).is_err());
    }

    #[test]
    fn test_parse_update_profile() {
        let command = parse_args(&args(&["update-profile", "--name", "X", "--bio", "hi"])).unwrap();
        assert_eq!(
            command,
            Command::UpdateProfile(ProfilePatch {
                full_name: Some("X".into()),
                bio: Some("hi".into()),
                ..Default::default()
            })
        );
        assert!(parse_args(&args(&["update-profile"])).is_err());
        assert!(parse_args(&args(&["update-profile", "--name"])).is_err());
        assert!(parse_args(&args(&["update-profile", "--age", "3"])).is_err());
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse_args(&args(&["logout"])).unwrap(), Command::Logout);
        assert_eq!(parse_args(&args(&["whoami"])).unwrap(), Command::WhoAmI);
        assert_eq!(parse_args(&args(&["watch"])).unwrap(), Command::Watch);
        assert!(parse_args(&args(&["dance"])).is_err());
    }
}
