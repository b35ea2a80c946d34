//! Download primitive behind the artifact acquirer.
//!
//! The acquirer only depends on the `fetch(url) -> bytes into writer`
//! contract; tests substitute a mock, production uses blocking reqwest with
//! explicit redirect handling.

use crate::error::{DeckhandError, DeckhandResult};
use reqwest::header::LOCATION;
use reqwest::Url;
use std::io::Write;
use std::time::Duration;

const MAX_REDIRECT_HOPS: usize = 10;

pub trait ArtifactFetcher {
    /// Stream the body of `url` into `dest`. Ok only after a complete 2xx
    /// body has been written.
    fn fetch(&self, url: &str, dest: &mut dyn Write) -> DeckhandResult<()>;
}

pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> DeckhandResult<Self> {
        // Redirects are followed by hand so that a 3xx without a Location
        // header is reported as a download failure, not silently retried.
        let client = reqwest::blocking::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| DeckhandError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl ArtifactFetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &mut dyn Write) -> DeckhandResult<()> {
        let mut current = url.to_string();
        for _hop in 0..MAX_REDIRECT_HOPS {
            let mut response =
                self.client
                    .get(&current)
                    .send()
                    .map_err(|e| DeckhandError::DownloadFailed {
                        url: current.clone(),
                        reason: e.to_string(),
                    })?;

            let status = response.status();
            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| DeckhandError::DownloadFailed {
                        url: current.clone(),
                        reason: format!("HTTP {} without a Location header", status),
                    })?;
                current = resolve_location(&current, location)?;
                tracing::debug!("following redirect to {}", current);
                continue;
            }

            if !status.is_success() {
                return Err(DeckhandError::DownloadFailed {
                    url: current,
                    reason: format!("HTTP {}", status),
                });
            }

            response
                .copy_to(dest)
                .map_err(|e| DeckhandError::DownloadFailed {
                    url: current.clone(),
                    reason: format!("transfer interrupted: {}", e),
                })?;
            return Ok(());
        }

        Err(DeckhandError::DownloadFailed {
            url: url.to_string(),
            reason: format!("more than {} redirects", MAX_REDIRECT_HOPS),
        })
    }
}

/// Resolve a possibly relative Location header against the current URL.
fn resolve_location(base: &str, location: &str) -> DeckhandResult<String> {
    let base = Url::parse(base).map_err(|e| DeckhandError::DownloadFailed {
        url: base.to_string(),
        reason: format!("invalid URL: {}", e),
    })?;
    let resolved = base
        .join(location)
        .map_err(|e| DeckhandError::DownloadFailed {
            url: base.to_string(),
            reason: format!("invalid redirect target '{}': {}", location, e),
        })?;
    Ok(resolved.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_locations_resolve_against_the_base() {
        let out = resolve_location(
            "https://artifacts.example.com/releases/engine.tar.gz",
            "/mirror/engine.tar.gz",
        )
        .unwrap();
        assert_eq!(out, "https://artifacts.example.com/mirror/engine.tar.gz");
    }

    #[test]
    fn absolute_locations_replace_the_base() {
        let out = resolve_location(
            "https://artifacts.example.com/releases/engine.tar.gz",
            "https://cdn.example.com/engine.tar.gz",
        )
        .unwrap();
        assert_eq!(out, "https://cdn.example.com/engine.tar.gz");
    }
}
