//! Phishing / credential detector
//!
//! Recognises login submissions, flags credential reuse across hosts, and
//! keeps the ignore-list and the deferred-capture token store.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use super::pending::{PendingLogin, PendingLogins};
use super::registry::{normalize_host, Credential, TrustRegistry};
use super::{TrafficCheck, Verdict};
use crate::error::{GuardError, RegistryError};
use crate::http::HttpMessage;

/// Form field names treated as the username
pub const USERNAME_FIELDS: &[&str] = &["username", "user", "uname"];

/// Form field names treated as the password
pub const PASSWORD_FIELDS: &[&str] = &["pass", "password", "pwd"];

/// Username/password pulled from a login form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginFields {
    pub username: String,
    pub password: String,
}

/// A (host, username) pair exempt from password-strength enforcement
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CreHostCombi {
    pub host: String,
    pub username: String,
}

/// True iff the form has both a username-like and a password-like field
pub fn is_login_request(params: &[(String, String)]) -> bool {
    let has_username = params
        .iter()
        .any(|(name, _)| USERNAME_FIELDS.contains(&name.as_str()));
    let has_password = params
        .iter()
        .any(|(name, _)| PASSWORD_FIELDS.contains(&name.as_str()));
    has_username && has_password
}

/// Extract login fields; the last matching field of each kind wins
pub fn login_fields(params: &[(String, String)]) -> Option<LoginFields> {
    if !is_login_request(params) {
        return None;
    }

    let last_value = |names: &[&str]| {
        params
            .iter()
            .rev()
            .find(|(name, _)| names.contains(&name.as_str()))
            .map(|(_, value)| value.clone())
    };

    Some(LoginFields {
        username: last_value(USERNAME_FIELDS)?,
        password: last_value(PASSWORD_FIELDS)?,
    })
}

/// Login-shaped POST: its fields, or `None` for any other request
pub fn login_submission(msg: &HttpMessage) -> Result<Option<LoginFields>, GuardError> {
    if !msg.is_post() {
        return Ok(None);
    }
    Ok(login_fields(&msg.form_params()?))
}

/// Credential-reuse detector and credential bookkeeping
pub struct PhishingDetector {
    registry: Arc<RwLock<TrustRegistry>>,
    ignore_list: RwLock<HashSet<CreHostCombi>>,
    pending: Mutex<PendingLogins>,
}

impl PhishingDetector {
    pub fn new(registry: Arc<RwLock<TrustRegistry>>, pending: PendingLogins) -> Self {
        Self {
            registry,
            ignore_list: RwLock::new(HashSet::new()),
            pending: Mutex::new(pending),
        }
    }

    /// Classify a login to `host`
    ///
    /// Safe when `host` already holds a credential for the username.
    /// Otherwise the first known host holding the same username and
    /// password is reported as the suspected legitimate host.
    pub fn classify_login(&self, host: &str, username: &str, password: &str) -> Verdict {
        let registry = self.registry.read();

        if let Some(site) = registry.lookup_known(host) {
            if site.credential(username).is_some() {
                return Verdict::Safe;
            }
        }

        for site in registry.known_websites() {
            for credential in &site.credentials {
                if credential.username == username && credential.verify(password) {
                    return Verdict::Suspect {
                        legit_host: site.host.clone(),
                    };
                }
            }
        }

        Verdict::Safe
    }

    /// Store a credential on a known host
    ///
    /// Returns false if the host is unknown or already has the username.
    pub fn commit_credential(&self, username: &str, password: &str, host: &str) -> bool {
        let mut registry = self.registry.write();
        match registry.lookup_known_mut(host) {
            Some(site) => site.add_credential(Credential::new(username, password)),
            None => false,
        }
    }

    /// Drop the credential for the username on a known host
    pub fn revoke_credential(&self, username: &str, host: &str) -> bool {
        let mut registry = self.registry.write();
        match registry.lookup_known_mut(host) {
            Some(site) => site.remove_credential(username),
            None => false,
        }
    }

    /// Park a suspicious login and return its token
    pub fn capture(&self, host: &str, fields: &LoginFields) -> String {
        let login = PendingLogin {
            host: normalize_host(host),
            username: fields.username.clone(),
            password: fields.password.clone(),
            captured_at: Utc::now(),
        };
        self.pending.lock().insert(login)
    }

    /// Operator confirmed a captured login: trust its host and keep the credential
    ///
    /// Returns the host the credential was committed to.
    pub fn confirm_capture(&self, token: &str) -> Result<String, GuardError> {
        let login = self
            .pending
            .lock()
            .take(token)
            .ok_or_else(|| RegistryError::UnknownToken(token.to_string()))?;

        let mut registry = self.registry.write();
        registry.add_known_host(&login.host);
        if let Some(site) = registry.lookup_known_mut(&login.host) {
            site.add_credential(Credential::new(&login.username, &login.password));
        }

        Ok(login.host)
    }

    /// Exempt a (host, username) pair from password-strength enforcement
    pub fn ignore(&self, host: &str, username: &str) {
        self.ignore_list.write().insert(CreHostCombi {
            host: normalize_host(host),
            username: username.to_string(),
        });
    }

    pub fn ignore_combi(&self, host: &str, username: &str) -> bool {
        self.ignore_list.read().contains(&CreHostCombi {
            host: normalize_host(host),
            username: username.to_string(),
        })
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl TrafficCheck for PhishingDetector {
    fn name(&self) -> &'static str {
        "Phishing"
    }

    fn check(&self, msg: &HttpMessage) -> Result<Verdict, GuardError> {
        match login_submission(msg)? {
            Some(fields) => Ok(self.classify_login(&msg.host_name()?, &fields.username, &fields.password)),
            None => Ok(Verdict::Safe),
        }
    }
}
