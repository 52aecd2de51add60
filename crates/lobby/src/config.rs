use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use lineio::{FramingMode, LineFramer};

use crate::password::PasswordScheme;

pub const USAGE: &str = "lobby (line session server)\n\n\
USAGE:\n  lobby [--bind HOST:PORT] [--accounts PATH] [--password-scheme sha256|argon2]\n        [--idle-timeout SECS] [--framing buffered|per_chunk]\n\n\
ENV:\n  LOBBY_BIND              default 0.0.0.0:4000\n  LOBBY_ACCOUNTS_PATH     default accounts.json\n  LOBBY_PASSWORD_SCHEME   default sha256 (sha256 | argon2)\n  LOBBY_IDLE_TIMEOUT_S    default 0 (disabled)\n  LOBBY_FRAMING           default buffered (buffered | per_chunk)\n  LOBBY_MAX_LINE_LEN      default 8192\n  RUST_LOG                default info,lobby=info\n";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("help requested")]
    Help,
    #[error("missing value for {0}")]
    MissingValue(String),
    #[error("bad value for {key}: {msg}")]
    BadValue { key: String, msg: String },
    #[error("unknown argument: {0}")]
    UnknownArg(String),
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind: SocketAddr,
    // Accounts file (stores only password hashes, never raw passwords).
    pub accounts_path: PathBuf,
    // Scheme for newly created accounts; existing hashes verify in either format.
    pub password_scheme: PasswordScheme,
    pub idle_timeout: Option<Duration>,
    pub framing: FramingMode,
    pub max_line_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 4000)),
            accounts_path: PathBuf::from("accounts.json"),
            password_scheme: PasswordScheme::Sha256,
            idle_timeout: None,
            framing: FramingMode::Buffered,
            max_line_len: 8 * 1024,
        }
    }
}

impl Config {
    /// Build from the process environment and command line.
    pub fn from_env_and_args() -> Result<Self, ConfigError> {
        Self::parse(|k| std::env::var(k).ok(), std::env::args().skip(1))
    }

    /// Env values first, then flags override them.
    pub fn parse<E, A>(env: E, args: A) -> Result<Self, ConfigError>
    where
        E: Fn(&str) -> Option<String>,
        A: IntoIterator<Item = String>,
    {
        let mut cfg = Config::default();

        if let Some(v) = env("LOBBY_BIND") {
            cfg.bind = parse_val("LOBBY_BIND", &v)?;
        }
        if let Some(v) = env("LOBBY_ACCOUNTS_PATH").filter(|v| !v.trim().is_empty()) {
            cfg.accounts_path = v.into();
        }
        if let Some(v) = env("LOBBY_PASSWORD_SCHEME") {
            cfg.password_scheme = parse_val("LOBBY_PASSWORD_SCHEME", &v)?;
        }
        if let Some(v) = env("LOBBY_IDLE_TIMEOUT_S") {
            cfg.idle_timeout = idle_timeout("LOBBY_IDLE_TIMEOUT_S", &v)?;
        }
        if let Some(v) = env("LOBBY_FRAMING") {
            cfg.framing = parse_val("LOBBY_FRAMING", &v)?;
        }
        if let Some(v) = env("LOBBY_MAX_LINE_LEN") {
            cfg.max_line_len = parse_val::<usize>("LOBBY_MAX_LINE_LEN", &v)?.max(1);
        }

        let mut it = args.into_iter();
        while let Some(arg) = it.next() {
            let mut value = |flag: &str| {
                it.next()
                    .ok_or_else(|| ConfigError::MissingValue(flag.to_string()))
            };
            match arg.as_str() {
                "--bind" => cfg.bind = parse_val("--bind", &value("--bind")?)?,
                "--accounts" => cfg.accounts_path = value("--accounts")?.into(),
                "--password-scheme" => {
                    cfg.password_scheme =
                        parse_val("--password-scheme", &value("--password-scheme")?)?
                }
                "--idle-timeout" => {
                    cfg.idle_timeout = idle_timeout("--idle-timeout", &value("--idle-timeout")?)?
                }
                "--framing" => cfg.framing = parse_val("--framing", &value("--framing")?)?,
                "-h" | "--help" => return Err(ConfigError::Help),
                _ => return Err(ConfigError::UnknownArg(arg)),
            }
        }

        Ok(cfg)
    }

    pub fn line_framer(&self) -> LineFramer {
        LineFramer::new(self.framing).max_line_len(self.max_line_len)
    }
}

fn parse_val<T>(key: &str, v: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    v.trim().parse().map_err(|e: T::Err| ConfigError::BadValue {
        key: key.to_string(),
        msg: e.to_string(),
    })
}

fn idle_timeout(key: &str, v: &str) -> Result<Option<Duration>, ConfigError> {
    let secs: u64 = parse_val(key, v)?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}
