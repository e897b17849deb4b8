use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_PORT: u16 = 3006;
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a number, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
    #[error("invalid bind address {0:?}")]
    InvalidAddr(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: IpAddr,
    pub port: u16,
    /// Base URL of the real-time transport checked by the status probe.
    pub socket_url: String,
    pub probe_timeout: Duration,
    pub tls: Option<TlsPaths>,
}

impl Config {
    /// Reads the process environment, after loading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_addr = match get("CHAT_BIND_ADDR") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidAddr(raw.clone()))?,
            None => IpAddr::from([0, 0, 0, 0]),
        };

        let port = match ["CHAT_PORT", "SOCKET_PORT", "PORT"]
            .into_iter()
            .find_map(|name| get(name).map(|value| (name, value)))
        {
            Some((name, value)) => parse_number(name, &value)?,
            None => DEFAULT_PORT,
        };

        let socket_url =
            get("SOCKET_URL").unwrap_or_else(|| format!("http://localhost:{port}"));

        let probe_timeout = match get("PROBE_TIMEOUT_SECS") {
            Some(value) => Duration::from_secs(parse_number("PROBE_TIMEOUT_SECS", &value)?),
            None => Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
        };

        let tls = match (get("TLS_CERT_PATH"), get("TLS_KEY_PATH")) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            _ => None,
        };

        Ok(Config {
            bind_addr,
            port,
            socket_url,
            probe_timeout,
            tls,
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        name,
        value: value.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]).unwrap();
        assert_eq!(c.port, 3006);
        assert_eq!(c.socket_url, "http://localhost:3006");
        assert_eq!(c.probe_timeout, Duration::from_secs(5));
        assert_eq!(c.socket_addr().to_string(), "0.0.0.0:3006");
        assert!(c.tls.is_none());
    }

    #[test]
    fn port_falls_back_through_aliases() {
        assert_eq!(config(&[("PORT", "8080")]).unwrap().port, 8080);
        assert_eq!(
            config(&[("SOCKET_PORT", "4000"), ("PORT", "8080")]).unwrap().port,
            4000
        );
        assert_eq!(
            config(&[("SOCKET_URL", "https://chat.example")]).unwrap().socket_url,
            "https://chat.example"
        );
    }

    #[test]
    fn tls_needs_both_paths() {
        assert!(config(&[("TLS_CERT_PATH", "cert.pem")]).unwrap().tls.is_none());
        let c = config(&[("TLS_CERT_PATH", "cert.pem"), ("TLS_KEY_PATH", "key.pem")]).unwrap();
        assert_eq!(c.tls.unwrap().key, PathBuf::from("key.pem"));
    }

    #[test]
    fn malformed_values_are_errors() {
        assert_eq!(
            config(&[("CHAT_PORT", "abc")]),
            Err(ConfigError::InvalidNumber {
                name: "CHAT_PORT",
                value: "abc".into()
            })
        );
        assert!(matches!(
            config(&[("CHAT_BIND_ADDR", "not-an-ip")]),
            Err(ConfigError::InvalidAddr(_))
        ));
    }
}
