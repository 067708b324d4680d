use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::{FailurePolicy, TunnelConfig};
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::key_management::AuthCredentials;

/// Multi-letter flags that are also accepted with a single dash (`-sh host`).
const SINGLE_DASH_FLAGS: &[&str] = &["sh", "sp", "rh", "rp", "lh", "lp"];

#[derive(Parser, Debug, Clone)]
#[command(name = "ssh-forward-tunnel")]
#[command(
    version,
    about = "Expose a remote TCP endpoint on a local port through an SSH server"
)]
pub struct Cli {
    /// Name of SSH host
    #[arg(long = "sh", value_name = "HOST", default_value = "localhost")]
    pub ssh_host: String,

    /// SSH host port
    #[arg(long = "sp", value_name = "PORT", default_value_t = 22, value_parser = clap::value_parser!(u16).range(1..))]
    pub ssh_port: u16,

    /// Name of remote host, as seen from the SSH host
    #[arg(long = "rh", value_name = "HOST", default_value = "localhost")]
    pub remote_host: String,

    /// Remote host port
    #[arg(long = "rp", value_name = "PORT", default_value_t = 80, value_parser = clap::value_parser!(u16).range(1..))]
    pub remote_port: u16,

    /// Local bind host
    #[arg(long = "lh", value_name = "HOST", default_value = "localhost")]
    pub local_host: String,

    /// Local bind port
    #[arg(long = "lp", value_name = "PORT", default_value_t = 8080, value_parser = clap::value_parser!(u16).range(1..))]
    pub local_port: u16,

    /// SSH user name
    #[arg(short = 'u', long = "user", default_value = "ubuntu")]
    pub user: String,

    /// Path to private key of SSH user
    #[arg(short = 'k', long = "key", value_name = "FILE", default_value = "./private.key")]
    pub key_file: PathBuf,

    /// Seconds allowed for connecting and authenticating each session
    #[arg(long = "dial-timeout", value_name = "SECS", default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub dial_timeout: u64,

    /// What a failed session or channel does to the rest of the tunnel
    #[arg(long = "on-connect-error", value_enum, default_value_t = FailurePolicy::FailFast)]
    pub on_connect_error: FailurePolicy,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long = "log-level", default_value = "info")]
    pub log_level: tracing::Level,
}

impl Cli {
    pub fn local(&self) -> Endpoint {
        Endpoint::new(self.local_host.clone(), self.local_port)
    }

    pub fn server(&self) -> Endpoint {
        Endpoint::new(self.ssh_host.clone(), self.ssh_port)
    }

    pub fn remote(&self) -> Endpoint {
        Endpoint::new(self.remote_host.clone(), self.remote_port)
    }

    /// Load the key and build the tunnel configuration.
    pub fn into_config(self) -> Result<TunnelConfig> {
        let credentials = AuthCredentials::load(self.user.clone(), &self.key_file)?;
        Ok(
            TunnelConfig::new(self.local(), self.server(), self.remote(), credentials)
                .with_dial_timeout(Duration::from_secs(self.dial_timeout))
                .with_failure_policy(self.on_connect_error),
        )
    }
}

/// Rewrite `-sh` style flags to `--sh` so clap can parse them.
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut out = Vec::new();
    let mut passthrough = false;

    for arg in args {
        let arg = arg.into();
        if !passthrough {
            if arg == "--" {
                passthrough = true;
            } else if let Some(rewritten) = arg.to_str().and_then(single_dash_long) {
                out.push(rewritten);
                continue;
            }
        }
        out.push(arg);
    }
    out
}

fn single_dash_long(arg: &str) -> Option<OsString> {
    let rest = arg.strip_prefix('-').filter(|r| !r.starts_with('-'))?;
    let name = rest.split_once('=').map_or(rest, |(name, _)| name);
    SINGLE_DASH_FLAGS
        .contains(&name)
        .then(|| OsString::from(format!("-{arg}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TunnelError;
    use crate::key_management::tests::ed25519_key_text;

    fn parse(args: &[&str]) -> Cli {
        let argv = std::iter::once("ssh-forward-tunnel").chain(args.iter().copied());
        Cli::try_parse_from(normalize_args(argv)).unwrap()
    }

    #[test]
    fn defaults_match_the_documented_flags() {
        let cli = parse(&[]);

        assert_eq!(cli.server(), Endpoint::new("localhost", 22));
        assert_eq!(cli.remote(), Endpoint::new("localhost", 80));
        assert_eq!(cli.local(), Endpoint::new("localhost", 8080));
        assert_eq!(cli.user, "ubuntu");
        assert_eq!(cli.key_file, PathBuf::from("./private.key"));
        assert_eq!(cli.dial_timeout, 30);
        assert_eq!(cli.on_connect_error, FailurePolicy::FailFast);
        assert_eq!(cli.log_level, tracing::Level::INFO);
    }

    #[test]
    fn single_dash_flags_are_accepted() {
        let cli = parse(&[
            "-sh", "192.0.2.1", "-sp", "2222", "-rh", "10.0.0.5", "-rp=8000", "-lh", "127.0.0.1",
            "-lp", "9090", "-u", "deploy", "-k", "/tmp/id",
        ]);

        assert_eq!(cli.server(), Endpoint::new("192.0.2.1", 2222));
        assert_eq!(cli.remote(), Endpoint::new("10.0.0.5", 8000));
        assert_eq!(cli.local(), Endpoint::new("127.0.0.1", 9090));
        assert_eq!(cli.user, "deploy");
        assert_eq!(cli.key_file, PathBuf::from("/tmp/id"));
    }

    #[test]
    fn extended_flags_parse() {
        let cli = parse(&[
            "--dial-timeout",
            "5",
            "--on-connect-error",
            "isolate",
            "--log-level",
            "debug",
        ]);

        assert_eq!(cli.dial_timeout, 5);
        assert_eq!(cli.on_connect_error, FailurePolicy::Isolate);
        assert_eq!(cli.log_level, tracing::Level::DEBUG);
    }

    #[test]
    fn port_zero_is_rejected() {
        let argv = normalize_args(["ssh-forward-tunnel", "-lp", "0"]);
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn normalize_leaves_other_args_alone() {
        let out = normalize_args(["prog", "-u", "bob", "--sh", "h", "-shx", "--", "-sh"]);
        assert_eq!(out, vec!["prog", "-u", "bob", "--sh", "h", "-shx", "--", "-sh"]);
    }

    #[test]
    fn into_config_loads_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("id_ed25519");
        std::fs::write(&key, ed25519_key_text().as_bytes()).unwrap();

        let config = parse(&["-k", key.to_str().unwrap(), "--dial-timeout", "7"])
            .into_config()
            .unwrap();

        assert_eq!(config.credentials.user(), "ubuntu");
        assert_eq!(config.dial_timeout, Duration::from_secs(7));
        assert_eq!(config.local, Endpoint::new("localhost", 8080));
    }

    #[test]
    fn into_config_fails_without_a_key() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("private.key");

        let result = parse(&["-k", missing.to_str().unwrap()]).into_config();
        assert!(matches!(result, Err(TunnelError::KeyRead { .. })));
    }
}
