//! Request decision engine
//!
//! Each request is analysed once and ends in exactly one terminal state.
//! The steps run in a fixed order and the first one that applies wins:
//!
//! 1. destination is a registered typo host: serve a redirect page
//! 2. typosquatting check: warn (HTML) or deny; HTML navigations to a safe
//!    host teach the registry that host
//! 3. operator control command: apply it and acknowledge
//! 4. login submission: commit, or warn about reuse / weak password
//! 5. passthrough
//!
//! Any error along the way is logged and the request passes through.

use std::sync::Arc;

use parking_lot::RwLock;

use super::control::ControlCommand;
use super::pending::PendingLogins;
use super::phishing::{login_submission, LoginFields, PhishingDetector};
use super::policy::{PasswordPolicy, PasswordVerdict};
use super::registry::{normalize_host, TrustRegistry, Website};
use super::templates::TemplateSet;
use super::typosquat::TyposquatDetector;
use super::{TrafficCheck, Verdict};
use crate::app::GuardConfig;
use crate::error::{GuardError, RegistryError, UserHint};
use crate::guard::constraints::PopularList;
use crate::http::HttpMessage;

/// Terminal state of the request phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Typo host; a redirect page was attached
    Redirect,
    /// Operator command; an acknowledgement page was attached
    Control,
    /// Login accepted; forward upstream
    LoginCommitted,
    /// Login blocked; a phishing or weak-password page was attached
    LoginWarned,
    /// Typosquatting; a warning page was attached
    Warn,
    /// Forward upstream untouched
    Passthrough,
    /// Typosquatting on a non-HTML request; refuse without a page
    Deny,
}

impl RequestOutcome {
    pub fn state(&self) -> &'static str {
        match self {
            RequestOutcome::Redirect => "REDIRECT",
            RequestOutcome::Control => "CONTROL",
            RequestOutcome::LoginCommitted => "LOGIN_COMMIT",
            RequestOutcome::LoginWarned => "LOGIN_WARN",
            RequestOutcome::Warn => "WARN",
            RequestOutcome::Passthrough => "PASSTHROUGH",
            RequestOutcome::Deny => "DENY",
        }
    }

    /// Whether the request goes on to the origin server
    pub fn forwards(&self) -> bool {
        matches!(
            self,
            RequestOutcome::Passthrough | RequestOutcome::LoginCommitted
        )
    }
}

/// Outcome of the response phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// The login failed upstream; its credential was dropped
    Revoke { host: String, username: String },
    Noop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelDecision {
    Allow,
    Deny,
}

/// Engine switches taken from the `[guard]` config section
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Enforce the password-strength chain on safe logins
    pub password_policy: bool,
    /// Put in front of the target host on redirect pages
    pub redirect_prefix: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            password_policy: true,
            redirect_prefix: "https://".to_string(),
        }
    }
}

impl From<&GuardConfig> for EngineSettings {
    fn from(config: &GuardConfig) -> Self {
        Self {
            password_policy: config.password_policy,
            redirect_prefix: config.redirect_prefix.clone(),
        }
    }
}

pub struct DecisionEngine {
    registry: Arc<RwLock<TrustRegistry>>,
    typosquat: TyposquatDetector,
    phishing: PhishingDetector,
    policy: PasswordPolicy,
    templates: TemplateSet,
    settings: EngineSettings,
}

impl DecisionEngine {
    pub fn new(
        registry: TrustRegistry,
        policy: PasswordPolicy,
        templates: TemplateSet,
        pending: PendingLogins,
        settings: EngineSettings,
    ) -> Self {
        let registry = Arc::new(RwLock::new(registry));
        Self {
            typosquat: TyposquatDetector::new(Arc::clone(&registry)),
            phishing: PhishingDetector::new(Arc::clone(&registry), pending),
            registry,
            policy,
            templates,
            settings,
        }
    }

    /// Build the engine around a loaded registry
    pub fn from_config(config: &GuardConfig, registry: TrustRegistry) -> Result<Self, GuardError> {
        let popular = match &config.popular_passwords_path {
            Some(path) => PopularList::load(path)?,
            None => PopularList::embedded(),
        };
        tracing::debug!(entries = popular.len(), "Popular password list ready");

        Ok(Self::new(
            registry,
            PasswordPolicy::standard(popular),
            TemplateSet::load(config.template_dir.as_deref()),
            PendingLogins::new(config.pending_ttl_secs, config.pending_capacity),
            EngineSettings::from(config),
        ))
    }

    /// Copy of the registry records for persistence
    pub fn snapshot(&self) -> Vec<Website> {
        self.registry.read().websites().to_vec()
    }

    pub fn registry(&self) -> Arc<RwLock<TrustRegistry>> {
        Arc::clone(&self.registry)
    }

    /// Request phase
    ///
    /// May attach a synthetic response to `msg`. Never fails: errors end in
    /// `Passthrough` with the message left without a response.
    pub fn on_request(&self, msg: &mut HttpMessage) -> RequestOutcome {
        match self.decide(msg) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(
                    url = %msg.url,
                    error = %e,
                    "Request check failed, passing through: {}",
                    e.user_message()
                );
                msg.response = None;
                RequestOutcome::Passthrough
            }
        }
    }

    /// Response phase: drop the credential of a login the server rejected
    pub fn on_response(&self, msg: &HttpMessage) -> ResponseOutcome {
        match self.check_response(msg) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(url = %msg.url, error = %e, "Response check failed, ignoring");
                ResponseOutcome::Noop
            }
        }
    }

    /// Decide on a CONNECT tunnel to `authority` (`host[:port]`)
    ///
    /// Only the host is available, so typo hosts and typosquatting
    /// violations are refused and everything else is tunnelled. Tunnels
    /// never teach the registry: the page type is unknown.
    pub fn on_tunnel(&self, authority: &str) -> TunnelDecision {
        let msg = HttpMessage::new_request("CONNECT", &format!("https://{}/", authority));
        match self.decide_tunnel(&msg) {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(authority = %authority, error = %e, "Tunnel check failed, allowing");
                TunnelDecision::Allow
            }
        }
    }

    fn decide(&self, msg: &mut HttpMessage) -> Result<RequestOutcome, GuardError> {
        let host = normalize_host(&msg.host_name()?);

        // 1. registered typo host
        let target = self
            .registry
            .read()
            .typo_target(&host)
            .map(|site| site.host.clone());
        if let Some(target) = target {
            let location = format!("{}{}", self.settings.redirect_prefix, target);
            msg.set_html_response(self.templates.redirect(&location));
            return Ok(self.finish(RequestOutcome::Redirect, &host, None));
        }

        // 2. typosquatting
        let search_host = normalize_host(&self.typosquat.resolve_search_host(msg)?);
        match self.run_check(&self.typosquat, msg)? {
            Verdict::Suspect { legit_host } => {
                if !msg.accepts_html() {
                    return Ok(self.finish(RequestOutcome::Deny, &host, Some(&search_host)));
                }
                msg.set_html_response(self.templates.typo_warning(&search_host, &legit_host));
                return Ok(self.finish(RequestOutcome::Warn, &host, Some(&search_host)));
            }
            Verdict::Safe if msg.accepts_html() => self.learn(&search_host),
            Verdict::Safe => {}
        }

        // 3. control commands
        if let Some(command) = ControlCommand::parse(&msg.url) {
            let action = match command {
                Ok(command) => self.apply_control(command),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring control command");
                    "The command could not be understood; nothing was changed.".to_string()
                }
            };
            msg.set_html_response(self.templates.acknowledgement(&action));
            return Ok(self.finish(RequestOutcome::Control, &host, Some(&search_host)));
        }

        // 4. login submissions
        if let Some(fields) = login_submission(msg)? {
            let outcome = self.evaluate_login(msg, &host, &fields)?;
            return Ok(self.finish(outcome, &host, Some(&search_host)));
        }

        Ok(self.finish(RequestOutcome::Passthrough, &host, Some(&search_host)))
    }

    fn evaluate_login(
        &self,
        msg: &mut HttpMessage,
        host: &str,
        fields: &LoginFields,
    ) -> Result<RequestOutcome, GuardError> {
        match self.run_check(&self.phishing, msg)? {
            Verdict::Suspect { legit_host } => {
                let token = self.phishing.capture(host, fields);
                tracing::info!(
                    host = %host,
                    legit_host = %legit_host,
                    username = %fields.username,
                    "Credential reuse detected, login held"
                );
                msg.set_html_response(self.templates.phishing_warning(
                    host,
                    &legit_host,
                    &fields.username,
                    &token,
                ));
                Ok(RequestOutcome::LoginWarned)
            }
            Verdict::Safe => {
                if self.settings.password_policy
                    && !self.phishing.ignore_combi(host, &fields.username)
                {
                    if let PasswordVerdict::Weak { rule, reason } =
                        self.policy.evaluate(&fields.password)
                    {
                        tracing::info!(host = %host, username = %fields.username, rule, "Weak password");
                        msg.set_html_response(self.templates.weak_password(
                            host,
                            &fields.username,
                            &reason,
                        ));
                        return Ok(RequestOutcome::LoginWarned);
                    }
                }

                if self
                    .phishing
                    .commit_credential(&fields.username, &fields.password, host)
                {
                    tracing::info!(host = %host, username = %fields.username, "Credential stored");
                } else {
                    tracing::debug!(
                        host = %host,
                        username = %fields.username,
                        "Credential not stored (unknown host or already present)"
                    );
                }
                Ok(RequestOutcome::LoginCommitted)
            }
        }
    }

    /// Apply an operator command and describe what was done
    fn apply_control(&self, command: ControlCommand) -> String {
        tracing::info!(command = command.name(), "Control command");
        match command {
            ControlCommand::TrustHost { host } => {
                self.registry.write().add_known_host(&host);
                format!("{} is now a trusted site.", host)
            }
            ControlCommand::RedirectTypo {
                typo_host,
                origin_host,
            } => match self.registry.write().add_typo_host(&typo_host, &origin_host) {
                Ok(()) => format!("{} will now take you to {}.", typo_host, origin_host),
                Err(e) => {
                    tracing::warn!(error = %e, "Redirect not registered");
                    e.user_hint()
                }
            },
            ControlCommand::IgnorePassword { host, username } => {
                self.phishing.ignore(&host, &username);
                format!(
                    "Password warnings for {} on {} are turned off.",
                    username, host
                )
            }
            ControlCommand::CaptureCredential { token } => match self.phishing.confirm_capture(&token) {
                Ok(host) => format!("{} is now trusted and your login there was remembered.", host),
                Err(GuardError::Registry(RegistryError::UnknownToken(_))) => {
                    tracing::warn!(token = %token, "Unknown or expired login token");
                    "This login has expired. Submit the form again to retry.".to_string()
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Login capture failed");
                    e.user_message()
                }
            },
        }
    }

    fn check_response(&self, msg: &HttpMessage) -> Result<ResponseOutcome, GuardError> {
        let status = match &msg.response {
            Some(response) if !response.synthetic => response.status,
            _ => return Ok(ResponseOutcome::Noop),
        };
        if matches!(status, 200 | 301 | 302) {
            return Ok(ResponseOutcome::Noop);
        }

        let Some(fields) = login_submission(msg)? else {
            return Ok(ResponseOutcome::Noop);
        };
        if !self.typosquat.is_safe(msg)? {
            return Ok(ResponseOutcome::Noop);
        }

        let host = normalize_host(&msg.host_name()?);
        let removed = self.phishing.revoke_credential(&fields.username, &host);
        tracing::info!(
            host = %host,
            username = %fields.username,
            status,
            removed,
            state = "REVOKE",
            "Login rejected upstream"
        );
        Ok(ResponseOutcome::Revoke {
            host,
            username: fields.username,
        })
    }

    fn decide_tunnel(&self, msg: &HttpMessage) -> Result<TunnelDecision, GuardError> {
        let host = normalize_host(&msg.host_name()?);

        if self.registry.read().is_typo(&host) {
            tracing::info!(host = %host, state = "DENY", "Tunnel to typo host refused");
            return Ok(TunnelDecision::Deny);
        }

        match self.run_check(&self.typosquat, msg)? {
            Verdict::Suspect { legit_host } => {
                tracing::info!(host = %host, legit_host = %legit_host, state = "DENY", "Tunnel refused");
                Ok(TunnelDecision::Deny)
            }
            Verdict::Safe => Ok(TunnelDecision::Allow),
        }
    }

    fn run_check(&self, check: &dyn TrafficCheck, msg: &HttpMessage) -> Result<Verdict, GuardError> {
        let verdict = check.check(msg)?;
        tracing::debug!(check = check.name(), url = %msg.url, ?verdict, "Check finished");
        Ok(verdict)
    }

    /// Remember a safe host unless it is a registered typo
    fn learn(&self, host: &str) {
        let mut registry = self.registry.write();
        if registry.is_typo(host) {
            return;
        }
        if registry.add_known_host(host) {
            tracing::info!(host = %host, "Learned known host");
        }
    }

    fn finish(&self, outcome: RequestOutcome, host: &str, search_host: Option<&str>) -> RequestOutcome {
        tracing::info!(
            host = %host,
            search_host = search_host.unwrap_or(host),
            state = outcome.state(),
            "Request decision"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(known: &[&str]) -> DecisionEngine {
        let mut registry = TrustRegistry::new();
        for host in known {
            registry.add_known_host(host);
        }
        DecisionEngine::new(
            registry,
            PasswordPolicy::default(),
            TemplateSet::builtin(),
            PendingLogins::new(600, 16),
            EngineSettings::default(),
        )
    }

    fn page(host: &str) -> HttpMessage {
        HttpMessage::new_request("GET", &format!("http://{}/", host))
            .with_header("Accept", "text/html,application/xhtml+xml,*/*;q=0.8")
    }

    fn login(host: &str, username: &str, password: &str) -> HttpMessage {
        HttpMessage::new_request("POST", &format!("https://{}/login", host))
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_body(&format!("username={}&password={}", username, password))
    }

    fn body(msg: &HttpMessage) -> String {
        msg.response
            .as_ref()
            .map(|r| String::from_utf8_lossy(&r.body).to_string())
            .unwrap_or_default()
    }

    /// The href of the first link containing `marker`
    fn link(body: &str, marker: &str) -> String {
        let at = body.find(marker).unwrap();
        let start = body[..at].rfind("href=\"").unwrap() + "href=\"".len();
        body[start..].chars().take_while(|c| *c != '"').collect()
    }

    fn is_known(engine: &DecisionEngine, host: &str) -> bool {
        engine.registry().read().lookup_known(host).is_some()
    }

    #[test]
    fn test_known_host_passes_through() {
        let engine = engine(&["www.youtube.com", "www.google.com"]);
        let mut msg = page("www.youtube.com");
        assert_eq!(engine.on_request(&mut msg), RequestOutcome::Passthrough);
        assert!(msg.response.is_none());
    }

    #[test]
    fn test_new_host_is_learned() {
        let engine = engine(&["www.youtube.com", "www.google.com"]);
        let mut msg = page("www.facebook.com");
        assert_eq!(engine.on_request(&mut msg), RequestOutcome::Passthrough);
        assert!(is_known(&engine, "www.facebook.com"));
    }

    #[test]
    fn test_referer_host_is_not_learned_for_resource() {
        let engine = engine(&["www.youtube.com", "www.google.com"]);
        let mut msg = HttpMessage::new_request("GET", "http://ads.tracker.net/pixel.gif")
            .with_header("Referer", "www.youtube.com");
        assert_eq!(engine.on_request(&mut msg), RequestOutcome::Passthrough);
        assert!(!is_known(&engine, "ads.tracker.net"));
    }

    #[test]
    fn test_sub_resources_are_not_learned() {
        let engine = engine(&["www.youtube.com"]);
        for host in ["img1.example.net", "img2.example.net"] {
            let mut msg = HttpMessage::new_request("GET", &format!("http://{}/a.png", host))
                .with_header("Accept", "image/png");
            assert_eq!(engine.on_request(&mut msg), RequestOutcome::Passthrough);
            assert!(!is_known(&engine, host));
        }

        assert_eq!(engine.on_tunnel("i1.ytimg.com:443"), TunnelDecision::Allow);
        assert_eq!(engine.on_tunnel("i2.ytimg.com:443"), TunnelDecision::Allow);
        assert!(!is_known(&engine, "i1.ytimg.com"));
    }

    #[test]
    fn test_typo_host_gets_warning_page() {
        let engine = engine(&["www.youtube.com"]);
        let mut msg = page("www.youtbe.com");
        assert_eq!(engine.on_request(&mut msg), RequestOutcome::Warn);

        let body = body(&msg);
        assert!(body.contains("youtbe.com"));
        assert!(body.contains("youtube.com"));
        assert!(!is_known(&engine, "youtbe.com"));

        let response = msg.response.as_ref().unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(
            response.headers.get("content-length").unwrap(),
            &response.body.len().to_string()
        );
    }

    #[test]
    fn test_typo_resource_is_denied() {
        let engine = engine(&["www.youtube.com"]);
        let mut msg = HttpMessage::new_request("GET", "http://www.youtbe.com/script.js")
            .with_header("Accept", "*/*");
        assert_eq!(engine.on_request(&mut msg), RequestOutcome::Deny);
        assert!(msg.response.is_none());
    }

    #[test]
    fn test_registered_typo_redirects() {
        let engine = engine(&["www.youtube.com"]);
        engine
            .registry()
            .write()
            .add_typo_host("www.youtbe.com", "www.youtube.com")
            .unwrap();

        let mut msg = page("www.youtbe.com");
        assert_eq!(engine.on_request(&mut msg), RequestOutcome::Redirect);
        assert!(body(&msg).contains("https://youtube.com"));
        assert!(!RequestOutcome::Redirect.forwards());
    }

    #[test]
    fn test_control_trust_host() {
        let engine = engine(&["www.youtube.com"]);
        let mut msg = page("youtube.com/__typoguard/trust-host/www.youtbe.com");
        assert_eq!(engine.on_request(&mut msg), RequestOutcome::Control);
        assert!(body(&msg).contains("youtbe.com is now a trusted site."));

        let mut msg = page("www.youtbe.com");
        assert_eq!(engine.on_request(&mut msg), RequestOutcome::Passthrough);
    }

    #[test]
    fn test_control_redirect_preference() {
        let engine = engine(&["www.youtube.com"]);
        let mut msg = page("youtube.com/__typoguard/redirect/youtbe.com;youtube.com");
        assert_eq!(engine.on_request(&mut msg), RequestOutcome::Control);

        let mut msg = page("www.youtbe.com");
        assert_eq!(engine.on_request(&mut msg), RequestOutcome::Redirect);
    }

    #[test]
    fn test_control_redirect_to_unknown_target_still_acknowledged() {
        let engine = engine(&[]);
        let mut msg = page("a.com/__typoguard/redirect/youtbe.com;youtube.com");
        assert_eq!(engine.on_request(&mut msg), RequestOutcome::Control);
        assert!(!engine.registry().read().is_typo("youtbe.com"));
    }

    #[test]
    fn test_control_redirect_cannot_hijack_known_host() {
        let engine = engine(&["www.youtube.com"]);
        let mut msg = page("youtube.com/__typoguard/redirect/youtube.com;youtube.com");
        assert_eq!(engine.on_request(&mut msg), RequestOutcome::Control);
        assert!(body(&msg).contains("cannot redirect elsewhere"));

        let mut visit = page("www.youtube.com");
        assert_eq!(engine.on_request(&mut visit), RequestOutcome::Passthrough);
        assert_eq!(engine.on_tunnel("www.youtube.com:443"), TunnelDecision::Allow);
    }

    #[test]
    fn test_safe_login_is_committed() {
        let engine = engine(&["site-a.com"]);
        let mut msg = login("site-a.com", "alice", "Tr0ub4dor-lamp");
        assert_eq!(engine.on_request(&mut msg), RequestOutcome::LoginCommitted);
        assert!(msg.response.is_none());

        let registry = engine.registry();
        let registry = registry.read();
        let site = registry.lookup_known("site-a.com").unwrap();
        assert!(site.credential("alice").unwrap().verify("Tr0ub4dor-lamp"));
    }

    #[test]
    fn test_credential_reuse_is_held() {
        let engine = engine(&["site-a.com", "site-b.org"]);
        let mut first = login("site-a.com", "a", "P@ss1-Zebra");
        assert_eq!(engine.on_request(&mut first), RequestOutcome::LoginCommitted);

        let mut reuse = login("site-b.org", "a", "P@ss1-Zebra");
        assert_eq!(engine.on_request(&mut reuse), RequestOutcome::LoginWarned);

        let body = body(&reuse);
        assert!(body.contains("site-b.org"));
        assert!(body.contains("site-a.com"));
        assert!(body.contains("/__typoguard/capture-credential/;"));
    }

    #[test]
    fn test_capture_command_commits_held_login() {
        let engine = engine(&["site-a.com", "site-b.org"]);
        engine.on_request(&mut login("site-a.com", "a", "P@ss1-Zebra"));

        let mut reuse = login("site-b.org", "a", "P@ss1-Zebra");
        engine.on_request(&mut reuse);
        let body = body(&reuse);
        let marker = "/__typoguard/capture-credential/;";
        let start = body.find(marker).unwrap() + marker.len();
        let token: String = body[start..].chars().take_while(|c| *c != '"').collect();

        let mut confirm = page(&format!("site-a.com{}{}", marker, token));
        assert_eq!(engine.on_request(&mut confirm), RequestOutcome::Control);

        let mut again = login("site-b.org", "a", "P@ss1-Zebra");
        assert_eq!(engine.on_request(&mut again), RequestOutcome::LoginCommitted);
    }

    #[test]
    fn test_weak_password_is_blocked() {
        let engine = engine(&["site-a.com"]);
        let mut msg = login("site-a.com", "alice", "123456");
        assert_eq!(engine.on_request(&mut msg), RequestOutcome::LoginWarned);
        assert!(body(&msg).contains("Password only contains numbers"));
        assert!(engine
            .registry()
            .read()
            .lookup_known("site-a.com")
            .unwrap()
            .credential("alice")
            .is_none());
    }

    #[test]
    fn test_ignore_list_bypasses_password_policy() {
        let engine = engine(&["site-a.com"]);
        let mut ignore = page("site-a.com/__typoguard/ignore-password/site-a.com;alice");
        assert_eq!(engine.on_request(&mut ignore), RequestOutcome::Control);

        let mut msg = login("site-a.com", "alice", "123456");
        assert_eq!(engine.on_request(&mut msg), RequestOutcome::LoginCommitted);
    }

    #[test]
    fn test_ignore_link_survives_unusual_username() {
        let engine = engine(&["site-a.com"]);
        let mut msg = login("site-a.com", "bob%231%3Bx", "123456");
        assert_eq!(engine.on_request(&mut msg), RequestOutcome::LoginWarned);

        let href = link(&body(&msg), "/__typoguard/ignore-password/");
        assert_eq!(href, "http://site-a.com/__typoguard/ignore-password/site-a.com;bob%231%3Bx");

        let mut follow = HttpMessage::new_request("GET", &href).with_header("Accept", "text/html");
        assert_eq!(engine.on_request(&mut follow), RequestOutcome::Control);
        assert!(engine.phishing.ignore_combi("site-a.com", "bob#1;x"));

        let mut again = login("site-a.com", "bob%231%3Bx", "123456");
        assert_eq!(engine.on_request(&mut again), RequestOutcome::LoginCommitted);
    }

    #[test]
    fn test_password_policy_can_be_disabled() {
        let mut registry = TrustRegistry::new();
        registry.add_known_host("site-a.com");
        let engine = DecisionEngine::new(
            registry,
            PasswordPolicy::default(),
            TemplateSet::builtin(),
            PendingLogins::new(600, 16),
            EngineSettings {
                password_policy: false,
                ..EngineSettings::default()
            },
        );

        let mut msg = login("site-a.com", "alice", "123456");
        assert_eq!(engine.on_request(&mut msg), RequestOutcome::LoginCommitted);
    }

    #[test]
    fn test_rejected_login_is_revoked() {
        let engine = engine(&["site-a.com"]);
        let mut msg = login("site-a.com", "alice", "Tr0ub4dor-lamp");
        engine.on_request(&mut msg);

        msg.set_upstream_status(302, "Found");
        assert_eq!(engine.on_response(&msg), ResponseOutcome::Noop);

        msg.set_upstream_status(401, "Unauthorized");
        assert_eq!(
            engine.on_response(&msg),
            ResponseOutcome::Revoke {
                host: "site-a.com".into(),
                username: "alice".into()
            }
        );
        assert!(engine
            .registry()
            .read()
            .lookup_known("site-a.com")
            .unwrap()
            .credential("alice")
            .is_none());
    }

    #[test]
    fn test_malformed_url_fails_open() {
        let engine = engine(&["www.youtube.com"]);
        let mut msg = HttpMessage::new_request("GET", "::garbage::").with_header("Accept", "text/html");
        assert_eq!(engine.on_request(&mut msg), RequestOutcome::Passthrough);
        assert!(msg.response.is_none());
        assert_eq!(engine.on_response(&msg), ResponseOutcome::Noop);
    }

    #[test]
    fn test_missing_template_yields_empty_page() {
        let mut registry = TrustRegistry::new();
        registry.add_known_host("www.youtube.com");
        let engine = DecisionEngine::new(
            registry,
            PasswordPolicy::default(),
            TemplateSet::empty(),
            PendingLogins::new(600, 16),
            EngineSettings::default(),
        );

        let mut msg = page("www.youtbe.com");
        assert_eq!(engine.on_request(&mut msg), RequestOutcome::Warn);
        let response = msg.response.unwrap();
        assert!(response.body.is_empty());
        assert_eq!(response.headers.get("content-length").unwrap(), "0");
    }

    #[test]
    fn test_concurrent_learning_adds_host_once() {
        let engine = engine(&["www.youtube.com"]);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let mut msg = page("www.facebook.com");
                    assert_eq!(engine.on_request(&mut msg), RequestOutcome::Passthrough);
                });
            }
        });

        let registry = engine.registry();
        let registry = registry.read();
        let count = registry
            .known_websites()
            .filter(|site| site.host == "facebook.com")
            .count();
        assert_eq!(count, 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_concurrent_commit_and_revoke() {
        let engine = engine(&["site-a.com"]);
        std::thread::scope(|scope| {
            for i in 0..8 {
                let engine = &engine;
                scope.spawn(move || {
                    let mut msg = login("site-a.com", &format!("user{}", i), "Tr0ub4dor-lamp");
                    assert_eq!(engine.on_request(&mut msg), RequestOutcome::LoginCommitted);
                    if i % 2 == 1 {
                        msg.set_upstream_status(403, "Forbidden");
                        assert!(matches!(engine.on_response(&msg), ResponseOutcome::Revoke { .. }));
                    }
                });
                scope.spawn(move || {
                    let mut msg = login("site-a.com", "shared", "Tr0ub4dor-lamp");
                    assert_eq!(engine.on_request(&mut msg), RequestOutcome::LoginCommitted);
                });
            }
        });

        let registry = engine.registry();
        let registry = registry.read();
        let site = registry.lookup_known("site-a.com").unwrap();
        let mut users: Vec<&str> = site.credentials.iter().map(|c| c.username.as_str()).collect();
        users.sort();
        assert_eq!(users, vec!["shared", "user0", "user2", "user4", "user6"]);
    }

    #[test]
    fn test_tunnel_decisions() {
        let engine = engine(&["www.youtube.com"]);
        assert_eq!(engine.on_tunnel("www.youtube.com:443"), TunnelDecision::Allow);
        assert_eq!(engine.on_tunnel("www.youtbe.com:443"), TunnelDecision::Deny);

        assert_eq!(engine.on_tunnel("news.example.org:443"), TunnelDecision::Allow);
        assert!(!is_known(&engine, "news.example.org"));

        engine
            .registry()
            .write()
            .add_typo_host("yutube.com", "youtube.com")
            .unwrap();
        assert_eq!(engine.on_tunnel("yutube.com:443"), TunnelDecision::Deny);
    }
}
