// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! DSN parsing and collector endpoint derivation.
//!
//! A DSN has the shape `scheme://public_key@host[:port]/project_id` and is
//! the only piece of configuration the transport needs to reach a
//! collector: the envelope intake URL and the auth header are both derived
//! from it.

use std::fmt;
use std::str::FromStr;

/// Protocol version spoken by this client, sent in the auth header.
pub const PROTOCOL_VERSION: u32 = 7;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DsnParseError {
    #[error("DSN has no scheme: {0}")]
    MissingScheme(String),

    #[error("DSN scheme must be http or https, got {0:?}")]
    InvalidScheme(String),

    #[error("DSN has no public key")]
    MissingPublicKey,

    #[error("DSN has no host")]
    MissingHost,

    #[error("DSN has an invalid port: {0:?}")]
    InvalidPort(String),

    #[error("DSN has no project id")]
    MissingProjectId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

/// Parsed collector address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dsn {
    scheme: Scheme,
    public_key: String,
    host: String,
    port: Option<u16>,
    project_id: String,
}

impl Dsn {
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.scheme.default_port())
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// URL the transport POSTs envelopes to.
    pub fn envelope_url(&self) -> String {
        let mut url = format!("{}://{}", self.scheme.as_str(), self.host);
        if let Some(port) = self.port {
            url.push_str(&format!(":{port}"));
        }
        url.push_str(&format!("/api/{}/envelope/", self.project_id));
        url
    }

    /// Value for the `X-Beacon-Auth` request header.
    pub fn auth_header(&self, client: &str) -> String {
        format!(
            "beacon_key={}, beacon_version={}, beacon_client={}",
            self.public_key, PROTOCOL_VERSION, client
        )
    }
}

impl fmt::Display for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}@{}",
            self.scheme.as_str(),
            self.public_key,
            self.host
        )?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        write!(f, "/{}", self.project_id)
    }
}

impl FromStr for Dsn {
    type Err = DsnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme_str, rest) = s
            .split_once("://")
            .ok_or_else(|| DsnParseError::MissingScheme(s.to_string()))?;
        let scheme = match scheme_str {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => return Err(DsnParseError::InvalidScheme(other.to_string())),
        };

        let (public_key, rest) = rest.split_once('@').ok_or(DsnParseError::MissingPublicKey)?;
        if public_key.is_empty() {
            return Err(DsnParseError::MissingPublicKey);
        }

        let (authority, project_id) = rest.split_once('/').ok_or(DsnParseError::MissingProjectId)?;
        let project_id = project_id.trim_matches('/');
        if project_id.is_empty() {
            return Err(DsnParseError::MissingProjectId);
        }

        let (host, port) = match authority.split_once(':') {
            Some((host, port_str)) => {
                let port = port_str
                    .parse::<u16>()
                    .map_err(|_| DsnParseError::InvalidPort(port_str.to_string()))?;
                (host, Some(port))
            }
            None => (authority, None),
        };
        if host.is_empty() {
            return Err(DsnParseError::MissingHost);
        }

        Ok(Dsn {
            scheme,
            public_key: public_key.to_string(),
            host: host.to_string(),
            port,
            project_id: project_id.to_string(),
        })
    }
}
