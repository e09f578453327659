//! Operator commands carried in request paths
//!
//! Warning pages link back through the proxy to URLs containing one of the
//! markers below. The proxy answers these itself; they never reach a server.

use crate::error::RegistryError;

use super::registry::normalize_host;

/// `<marker><host>`: trust the host
pub const TRUST_HOST_MARKER: &str = "/__typoguard/trust-host/";

/// `<marker><typo host>;<origin host>`: always redirect the typo host
pub const REDIRECT_MARKER: &str = "/__typoguard/redirect/";

/// `<marker><host>;<username>`: stop password-strength warnings for the pair
pub const IGNORE_PASSWORD_MARKER: &str = "/__typoguard/ignore-password/";

/// `<marker>;<token>`: commit a captured login
pub const CAPTURE_CREDENTIAL_MARKER: &str = "/__typoguard/capture-credential/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    TrustHost { host: String },
    RedirectTypo { typo_host: String, origin_host: String },
    IgnorePassword { host: String, username: String },
    CaptureCredential { token: String },
}

impl ControlCommand {
    /// Recognise a command anywhere in the URL
    ///
    /// `None` when no marker is present; an error when a marker is present
    /// but its parameters are unusable.
    pub fn parse(url: &str) -> Option<Result<Self, RegistryError>> {
        let markers = [
            TRUST_HOST_MARKER,
            REDIRECT_MARKER,
            IGNORE_PASSWORD_MARKER,
            CAPTURE_CREDENTIAL_MARKER,
        ];

        markers.iter().find_map(|marker| {
            let start = url.find(marker)?;
            let rest = &url[start + marker.len()..];
            let rest = rest.split(['?', '#']).next().unwrap_or_default();
            let rest = rest.trim_end_matches('/');
            Some(Self::from_params(marker, rest))
        })
    }

    fn from_params(marker: &str, rest: &str) -> Result<Self, RegistryError> {
        let params: Vec<String> = rest
            .split(';')
            .map(|p| urlencoding::decode(p).map(|s| s.into_owned()).unwrap_or_else(|_| p.to_string()))
            .collect();
        let malformed = || RegistryError::MalformedCommand(format!("{}{}", marker, rest));
        let host_param = |i: usize| {
            params
                .get(i)
                .map(|p| normalize_host(p.trim()))
                .filter(|h| !h.is_empty())
        };

        match marker {
            TRUST_HOST_MARKER => Ok(ControlCommand::TrustHost {
                host: host_param(0).ok_or_else(malformed)?,
            }),
            REDIRECT_MARKER => Ok(ControlCommand::RedirectTypo {
                typo_host: host_param(0).ok_or_else(malformed)?,
                origin_host: host_param(1).ok_or_else(malformed)?,
            }),
            IGNORE_PASSWORD_MARKER => {
                let username = params
                    .get(1)
                    .filter(|u| !u.is_empty())
                    .cloned()
                    .ok_or_else(malformed)?;
                Ok(ControlCommand::IgnorePassword {
                    host: host_param(0).ok_or_else(malformed)?,
                    username,
                })
            }
            _ => {
                let token = params
                    .iter()
                    .rev()
                    .map(|p| p.trim())
                    .find(|p| !p.is_empty())
                    .ok_or_else(malformed)?;
                Ok(ControlCommand::CaptureCredential {
                    token: token.to_string(),
                })
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ControlCommand::TrustHost { .. } => "trust-host",
            ControlCommand::RedirectTypo { .. } => "redirect",
            ControlCommand::IgnorePassword { .. } => "ignore-password",
            ControlCommand::CaptureCredential { .. } => "capture-credential",
        }
    }
}
