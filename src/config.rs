//! Startup configuration: flags with environment fallbacks.
//!
//! Parsed once in `main`, normalized, then consumed to build the verifier and
//! the pipeline. Nothing reads configuration after startup.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use clap::Parser;

use crate::error::Error;
use crate::verifier::{DEFAULT_CACHE_TTL, DEFAULT_LEEWAY_SECS, DEFAULT_MIN_REFRESH_INTERVAL};

/// Path of the signing-key set under the auth domain.
pub const CERTS_PATH: &str = "/cdn-cgi/access/certs";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "subreq",
    version,
    about = "Authorization service for nginx validating Cloudflare Access JWTs through subrequests"
)]
pub struct Config {
    /// The Cloudflare Access auth domain to request certs from (token issuer)
    #[arg(long, env = "AUTH_DOMAIN")]
    pub auth_domain: String,

    /// The expected audience of the JWT
    #[arg(long, env = "AUDIENCE")]
    pub audience: String,

    /// Address to listen for requests on
    #[arg(long, default_value_t = IpAddr::V6(Ipv6Addr::UNSPECIFIED))]
    pub address: IpAddr,

    /// Port to listen on
    #[arg(long, default_value_t = 3000)]
    pub port: u16,

    /// Log every request before verifying it
    #[arg(long, env = "DEBUG", default_value_t = false)]
    pub debug: bool,

    /// Clock skew tolerated on `exp` / `nbf`, in seconds
    #[arg(long, env = "TOKEN_LEEWAY_SECONDS", default_value_t = DEFAULT_LEEWAY_SECS)]
    pub leeway: u64,

    /// How long fetched signing keys are trusted before refetching, in seconds
    #[arg(long, env = "KEYS_CACHE_TTL_SECONDS", default_value_t = DEFAULT_CACHE_TTL.as_secs())]
    pub keys_ttl: u64,

    /// Minimum time between two fetches of the signing keys, in seconds
    #[arg(long, env = "KEYS_MIN_REFRESH_SECONDS", default_value_t = DEFAULT_MIN_REFRESH_INTERVAL.as_secs())]
    pub keys_refresh_interval: u64,
}

impl Config {
    /// Parses `std::env::args` and the environment, exiting with usage on
    /// missing or malformed flags.
    pub fn from_args() -> Result<Self, Error> {
        Self::parse().normalized()
    }

    /// Normalizes the auth domain and rejects empty required values.
    pub fn normalized(mut self) -> Result<Self, Error> {
        self.auth_domain = normalize_domain(&self.auth_domain)?;
        self.audience = self.audience.trim().to_owned();
        if self.audience.is_empty() {
            return Err(Error::Config("audience must not be empty".to_owned()));
        }
        Ok(self)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    pub fn certs_url(&self) -> String {
        certs_url(&self.auth_domain)
    }

    pub fn keys_ttl(&self) -> Duration {
        Duration::from_secs(self.keys_ttl)
    }

    pub fn keys_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.keys_refresh_interval)
    }
}

/// Brings an auth domain into issuer form: exactly one scheme, no trailing
/// slash. A bare host gets `https://`.
pub fn normalize_domain(raw: &str) -> Result<String, Error> {
    let domain = raw.trim();
    let (scheme, rest) = match domain.split_once("://") {
        Some((scheme, rest))
            if scheme.eq_ignore_ascii_case("https") || scheme.eq_ignore_ascii_case("http") =>
        {
            (scheme, rest)
        }
        Some(_) => return Err(Error::Config(format!("unsupported scheme in auth domain {raw:?}"))),
        None => ("https", domain),
    };

    let host = rest.trim_end_matches('/');
    if host.is_empty() {
        return Err(Error::Config(format!("auth domain {raw:?} has no host")));
    }
    Ok(format!("{scheme}://{host}"))
}

pub fn certs_url(auth_domain: &str) -> String {
    format!("{auth_domain}{CERTS_PATH}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config, clap::Error> {
        Config::try_parse_from(std::iter::once("subreq").chain(args.iter().copied()))
    }

    #[test]
    fn bare_domain_gets_https() {
        assert_eq!(
            normalize_domain("team.cloudflareaccess.com").unwrap(),
            "https://team.cloudflareaccess.com"
        );
    }

    #[test]
    fn existing_scheme_is_not_doubled() {
        assert_eq!(
            normalize_domain("https://team.cloudflareaccess.com").unwrap(),
            "https://team.cloudflareaccess.com"
        );
        assert_eq!(normalize_domain("http://127.0.0.1:8080").unwrap(), "http://127.0.0.1:8080");
        assert_eq!(normalize_domain("HTTPS://Team.example").unwrap(), "HTTPS://Team.example");
    }

    #[test]
    fn trailing_slash_and_whitespace_are_trimmed() {
        assert_eq!(
            normalize_domain("  https://team.cloudflareaccess.com/ ").unwrap(),
            "https://team.cloudflareaccess.com"
        );
        assert_eq!(normalize_domain("team.example//").unwrap(), "https://team.example");
    }

    #[test]
    fn empty_or_foreign_domains_are_rejected() {
        assert!(normalize_domain("").is_err());
        assert!(normalize_domain("https://").is_err());
        assert!(normalize_domain("ftp://team.example").is_err());
    }

    #[test]
    fn certs_url_hangs_off_domain() {
        assert_eq!(
            certs_url("https://team.cloudflareaccess.com"),
            "https://team.cloudflareaccess.com/cdn-cgi/access/certs"
        );
    }

    #[test]
    fn defaults_apply() {
        let cfg = parse(&["--auth-domain", "team.example", "--audience", "aud"])
            .unwrap()
            .normalized()
            .unwrap();

        assert_eq!(cfg.auth_domain, "https://team.example");
        assert_eq!(cfg.socket_addr(), "[::]:3000".parse::<SocketAddr>().unwrap());
        assert!(!cfg.debug);
        assert_eq!(cfg.leeway, DEFAULT_LEEWAY_SECS);
        assert_eq!(cfg.keys_ttl(), DEFAULT_CACHE_TTL);
        assert_eq!(cfg.keys_refresh_interval(), DEFAULT_MIN_REFRESH_INTERVAL);
        assert_eq!(cfg.certs_url(), "https://team.example/cdn-cgi/access/certs");
    }

    #[test]
    fn flags_override_defaults() {
        let cfg = parse(&[
            "--auth-domain", "https://team.example",
            "--audience", "aud",
            "--address", "127.0.0.1",
            "--port", "8081",
            "--debug",
            "--leeway", "0",
            "--keys-ttl", "300",
            "--keys-refresh-interval", "1",
        ])
        .unwrap();

        assert_eq!(cfg.socket_addr(), "127.0.0.1:8081".parse::<SocketAddr>().unwrap());
        assert!(cfg.debug);
        assert_eq!(cfg.leeway, 0);
        assert_eq!(cfg.keys_ttl(), Duration::from_secs(300));
        assert_eq!(cfg.keys_refresh_interval(), Duration::from_secs(1));
    }

    #[test]
    fn required_flags_are_required() {
        // Only meaningful when the environment does not supply them.
        if std::env::var_os("AUTH_DOMAIN").is_none() {
            assert!(parse(&["--audience", "aud"]).is_err());
        }
        if std::env::var_os("AUDIENCE").is_none() {
            assert!(parse(&["--auth-domain", "team.example"]).is_err());
        }
    }

    #[test]
    fn blank_audience_is_a_config_error() {
        let err = parse(&["--auth-domain", "team.example", "--audience", "  "])
            .unwrap()
            .normalized()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
