use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use thiserror::Error;

use crate::event::WatchMask;
use crate::restart::ProcessTargets;
use crate::transport::{Endpoint, HttpTransport, TransportError};

pub const SERVER_URL_VAR: &str = "SUPERVISOR_SERVER_URL";
pub const USERNAME_VAR: &str = "SUPERVISOR_USERNAME";
pub const PASSWORD_VAR: &str = "SUPERVISOR_PASSWORD";

/// Command-line surface. Parsed with clap, then checked by [`Args::validate`].
#[derive(Parser, Debug)]
#[command(name = "fsevent-listener", version)]
#[command(about = "supervisord event listener that restarts programs when watched paths change")]
pub struct Args {
    /// Files or directories to watch
    #[arg(value_name = "PATH", required = true)]
    pub paths: Vec<PathBuf>,

    /// Programs to restart (name or group:name)
    #[arg(short, long, value_name = "PROGRAM", num_args = 1..)]
    pub programs: Vec<String>,

    /// Restart every RUNNING program
    #[arg(short, long)]
    pub any: bool,

    /// Count renames and moves as activity
    #[arg(long)]
    pub watch_moved: bool,

    /// Count created paths as activity
    #[arg(long)]
    pub watch_created: bool,

    /// Count deleted paths as activity
    #[arg(long)]
    pub watch_deleted: bool,

    /// Count content and metadata changes as activity
    #[arg(long)]
    pub watch_modified: bool,

    /// Count every kind of change as activity
    #[arg(long)]
    pub watch_all: bool,

    /// Watch directories recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// Wait a random 0..SECONDS before restarting
    #[arg(long, value_name = "SECONDS")]
    pub dither: Option<f64>,

    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long)]
    pub verbose: bool,
}

/// Validated startup settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub paths: Vec<PathBuf>,
    pub recursive: bool,
    pub targets: ProcessTargets,
    pub mask: WatchMask,
    pub dither: Option<Duration>,
    pub verbose: bool,
}

impl Args {
    /// Checks the cross-argument rules clap cannot express. Errors carry
    /// usage text; `clap::Error::exit` prints it and exits with status 2.
    pub fn validate(self) -> Result<Config, clap::Error> {
        let usage = |kind: ErrorKind, msg: String| Args::command().error(kind, msg);

        if let Some(missing) = self.paths.iter().find(|p| !p.exists()) {
            return Err(usage(
                ErrorKind::ValueValidation,
                format!("Must specify a path which exists: {}", missing.display()),
            ));
        }

        let targets = if self.any {
            ProcessTargets::Any
        } else if !self.programs.is_empty() {
            ProcessTargets::Named(self.programs.into_iter().collect::<BTreeSet<_>>())
        } else {
            return Err(usage(
                ErrorKind::MissingRequiredArgument,
                "Must specify either -p, --programs or -a, --any.".to_string(),
            ));
        };

        let mask = if self.watch_all {
            WatchMask::ALL
        } else {
            WatchMask {
                moved: self.watch_moved,
                created: self.watch_created,
                deleted: self.watch_deleted,
                modified: self.watch_modified,
            }
        };
        if mask.is_empty() {
            return Err(usage(
                ErrorKind::MissingRequiredArgument,
                "Must specify which event/s to watch.".to_string(),
            ));
        }

        let dither = match self.dither {
            None => None,
            Some(secs) => match Duration::try_from_secs_f64(secs) {
                Ok(d) if d.is_zero() => None,
                Ok(d) => Some(d),
                Err(_) => {
                    return Err(usage(
                        ErrorKind::ValueValidation,
                        format!("--dither must be a non-negative number of seconds, got {secs}"),
                    ))
                }
            },
        };

        Ok(Config {
            paths: self.paths,
            recursive: self.recursive,
            targets,
            mask,
            dither,
            verbose: self.verbose,
        })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("fsevent-listener must be run as a supervisor event listener (SUPERVISOR_SERVER_URL is not set)")]
    NotUnderSupervisor,

    #[error(transparent)]
    InvalidServerUrl(#[from] TransportError),
}

/// Builds the RPC transport from supervisord's environment, looked up via
/// `var` so tests need not touch the process environment.
pub fn transport_from_env<F>(var: F) -> Result<HttpTransport, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let url = var(SERVER_URL_VAR).ok_or(ConfigError::NotUnderSupervisor)?;
    let transport = HttpTransport::new(Endpoint::parse(&url)?);
    Ok(match var(USERNAME_VAR) {
        Some(user) => transport.with_basic_auth(&user, &var(PASSWORD_VAR).unwrap_or_default()),
        None => transport,
    })
}
