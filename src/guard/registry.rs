//! Trust registry
//!
//! In-memory store of known hosts, typo-to-target mappings and the
//! credentials owned by each known host. Hosts are kept in canonical form
//! (see [`normalize_host`]) and compared exactly.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use crate::error::RegistryError;

const SALT_LEN: usize = 16;

/// Canonical registry form of a host
///
/// Strips an `http://`/`https://` scheme, anything from the first `/`, and a
/// leading `www.`. Case is preserved.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let host = host
        .strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(host);
    let host = host.split('/').next().unwrap_or(host);
    host.strip_prefix("www.").unwrap_or(host).to_string()
}

/// A stored login: username plus salted SHA-512 of the password
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,

    /// Random per-credential salt (hex)
    pub salt: String,

    /// SHA-512 over salt bytes followed by the password (hex)
    pub salted_hash: String,
}

impl Credential {
    pub fn new(username: &str, password: &str) -> Self {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);

        let salt = hex::encode(salt);
        let salted_hash = salted_digest(&salt, password);

        Self {
            username: username.to_string(),
            salt,
            salted_hash,
        }
    }

    /// Hash `password` with this credential's salt
    pub fn hash(&self, password: &str) -> String {
        salted_digest(&self.salt, password)
    }

    /// Whether `password` is the one this credential was created with
    pub fn verify(&self, password: &str) -> bool {
        self.hash(password) == self.salted_hash
    }
}

fn salted_digest(salt_hex: &str, password: &str) -> String {
    let mut hasher = Sha512::new();
    match hex::decode(salt_hex) {
        Ok(salt) => hasher.update(&salt),
        Err(_) => hasher.update(salt_hex.as_bytes()),
    }
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// A trusted destination and the credentials used on it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownWebsite {
    pub host: String,
    pub credentials: Vec<Credential>,
}

impl KnownWebsite {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            credentials: Vec::new(),
        }
    }

    pub fn credential(&self, username: &str) -> Option<&Credential> {
        self.credentials.iter().find(|c| c.username == username)
    }

    /// Add a credential unless one already exists for the username
    pub fn add_credential(&mut self, credential: Credential) -> bool {
        if self.credential(&credential.username).is_some() {
            return false;
        }
        self.credentials.push(credential);
        true
    }

    /// Remove the first credential for the username
    pub fn remove_credential(&mut self, username: &str) -> bool {
        match self.credentials.iter().position(|c| c.username == username) {
            Some(index) => {
                self.credentials.remove(index);
                true
            }
            None => false,
        }
    }
}

/// A typo host and the known host it should lead to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypoWebsite {
    pub host: String,

    /// Host of the target [`KnownWebsite`]
    pub target: String,
}

/// Registry record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Website {
    Known(KnownWebsite),
    Typo(TypoWebsite),
}

/// All registry records, in insertion order
#[derive(Debug, Clone, Default)]
pub struct TrustRegistry {
    websites: Vec<Website>,
}

impl TrustRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted records, normalizing hosts
    ///
    /// Known-host duplicates after normalization are dropped; typo records
    /// are kept as-is.
    pub fn from_websites(websites: Vec<Website>) -> Self {
        let mut registry = Self::new();
        for website in websites {
            match website {
                Website::Known(mut known) => {
                    known.host = normalize_host(&known.host);
                    if registry.lookup_known(&known.host).is_none() {
                        registry.websites.push(Website::Known(known));
                    }
                }
                Website::Typo(mut typo) => {
                    typo.host = normalize_host(&typo.host);
                    typo.target = normalize_host(&typo.target);
                    registry.websites.push(Website::Typo(typo));
                }
            }
        }
        registry
    }

    /// Records for persistence
    pub fn websites(&self) -> &[Website] {
        &self.websites
    }

    pub fn len(&self) -> usize {
        self.websites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.websites.is_empty()
    }

    /// Register a known host; false if it already is one
    pub fn add_known_host(&mut self, host: &str) -> bool {
        let host = normalize_host(host);
        if host.is_empty() || self.lookup_known(&host).is_some() {
            return false;
        }
        self.websites.push(Website::Known(KnownWebsite::new(&host)));
        true
    }

    /// Map a typo host to a known target host
    ///
    /// Always appends, even when the typo host is already mapped. A known
    /// host (the target included) can never become a typo host.
    pub fn add_typo_host(&mut self, host: &str, target: &str) -> Result<(), RegistryError> {
        let host = normalize_host(host);
        let target = normalize_host(target);
        if host == target || self.lookup_known(&host).is_some() {
            return Err(RegistryError::TrustedTypoHost(host));
        }
        if self.lookup_known(&target).is_none() {
            return Err(RegistryError::UnknownTarget(target));
        }

        if self.is_typo(&host) {
            tracing::warn!(host = %host, "Typo host registered more than once");
        }

        self.websites.push(Website::Typo(TypoWebsite { host, target }));
        Ok(())
    }

    pub fn lookup_known(&self, host: &str) -> Option<&KnownWebsite> {
        let host = normalize_host(host);
        self.known_websites().find(|w| w.host == host)
    }

    pub fn lookup_known_mut(&mut self, host: &str) -> Option<&mut KnownWebsite> {
        let host = normalize_host(host);
        self.websites.iter_mut().find_map(|w| match w {
            Website::Known(known) if known.host == host => Some(known),
            _ => None,
        })
    }

    pub fn is_typo(&self, host: &str) -> bool {
        let host = normalize_host(host);
        self.typo_websites().any(|t| t.host == host)
    }

    /// Target of the first mapping for a typo host
    pub fn typo_target(&self, host: &str) -> Option<&KnownWebsite> {
        let host = normalize_host(host);
        let typo = self.typo_websites().find(|t| t.host == host)?;
        self.lookup_known(&typo.target)
    }

    /// Known hosts in insertion order
    pub fn known_hosts(&self) -> Vec<String> {
        self.known_websites().map(|w| w.host.clone()).collect()
    }

    pub fn known_websites(&self) -> impl Iterator<Item = &KnownWebsite> {
        self.websites.iter().filter_map(|w| match w {
            Website::Known(known) => Some(known),
            Website::Typo(_) => None,
        })
    }

    pub fn typo_websites(&self) -> impl Iterator<Item = &TypoWebsite> {
        self.websites.iter().filter_map(|w| match w {
            Website::Typo(typo) => Some(typo),
            Website::Known(_) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("https://www.youtube.com"), "youtube.com");
        assert_eq!(normalize_host("http://youtube.com/watch?v=1"), "youtube.com");
        assert_eq!(normalize_host("www.google.com"), "google.com");
        assert_eq!(normalize_host("mail.google.com"), "mail.google.com");
        assert_eq!(normalize_host("Example.COM"), "Example.COM");
    }

    #[test]
    fn test_add_known_host_is_idempotent() {
        let mut registry = TrustRegistry::new();
        assert!(registry.add_known_host("www.example.com"));
        assert!(!registry.add_known_host("www.example.com"));
        assert!(!registry.add_known_host("https://example.com"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.known_hosts(), vec!["example.com".to_string()]);
    }

    #[test]
    fn test_typo_mapping() {
        let mut registry = TrustRegistry::new();
        registry.add_known_host("www.youtube.com");
        registry.add_typo_host("www.youtbe.com", "www.youtube.com").unwrap();

        assert!(registry.is_typo("www.youtbe.com"));
        assert!(!registry.is_typo("www.youtube.com"));
        assert_eq!(registry.typo_target("youtbe.com").unwrap().host, "youtube.com");
        assert!(registry.lookup_known("www.youtbe.com").is_none());
        assert_eq!(registry.known_hosts().len(), 1);
    }

    #[test]
    fn test_typo_duplicates_are_appended() {
        let mut registry = TrustRegistry::new();
        registry.add_known_host("youtube.com");
        registry.add_typo_host("youtbe.com", "youtube.com").unwrap();
        registry.add_typo_host("youtbe.com", "youtube.com").unwrap();
        assert_eq!(registry.typo_websites().count(), 2);
    }

    #[test]
    fn test_typo_requires_known_target() {
        let mut registry = TrustRegistry::new();
        let err = registry.add_typo_host("youtbe.com", "youtube.com").unwrap_err();
        assert!(matches!(err, RegistryError::UnknownTarget(host) if host == "youtube.com"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_known_host_cannot_become_typo() {
        let mut registry = TrustRegistry::new();
        registry.add_known_host("youtube.com");
        registry.add_known_host("youtu.be");

        let err = registry.add_typo_host("www.youtube.com", "youtube.com").unwrap_err();
        assert!(matches!(err, RegistryError::TrustedTypoHost(host) if host == "youtube.com"));

        let err = registry.add_typo_host("youtu.be", "youtube.com").unwrap_err();
        assert!(matches!(err, RegistryError::TrustedTypoHost(_)));

        assert_eq!(registry.typo_websites().count(), 0);
        assert!(!registry.is_typo("youtube.com"));
    }

    #[test]
    fn test_credentials() {
        let mut site = KnownWebsite::new("example.com");
        assert!(site.add_credential(Credential::new("alice", "s3cret")));
        assert!(!site.add_credential(Credential::new("alice", "other")));
        assert!(site.credential("alice").unwrap().verify("s3cret"));
        assert!(!site.credential("alice").unwrap().verify("other"));

        assert!(site.remove_credential("alice"));
        assert!(!site.remove_credential("alice"));
        assert!(site.credentials.is_empty());
    }

    #[test]
    fn test_credential_salts_differ() {
        let a = Credential::new("alice", "same");
        let b = Credential::new("alice", "same");
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.salted_hash, b.salted_hash);
        assert_eq!(a.salt.len(), SALT_LEN * 2);
        assert_eq!(a.salted_hash.len(), 128);
    }

    #[test]
    fn test_from_websites_normalizes() {
        let registry = TrustRegistry::from_websites(vec![
            Website::Known(KnownWebsite::new("www.youtube.com")),
            Website::Known(KnownWebsite::new("youtube.com")),
            Website::Typo(TypoWebsite {
                host: "www.youtbe.com".into(),
                target: "www.youtube.com".into(),
            }),
        ]);
        assert_eq!(registry.known_hosts(), vec!["youtube.com".to_string()]);
        assert_eq!(registry.typo_target("youtbe.com").unwrap().host, "youtube.com");
    }
}
