//! HTML pages served in place of blocked or redirected requests
//!
//! Pages are plain HTML with bracketed placeholders (`[TypoHost]`,
//! `[Username]`, ...) replaced at render time. A placeholder written as
//! `[Username|url]` receives the percent-encoded value, for use inside link
//! paths. Built-in pages are compiled in; a template directory may override
//! any of them file by file.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{GuardError, TemplateError, UserHint};

/// The pages the guard can serve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageKind {
    TypoWarning,
    Redirect,
    Acknowledgement,
    PhishingWarning,
    WeakPassword,
}

impl PageKind {
    pub const ALL: [PageKind; 5] = [
        PageKind::TypoWarning,
        PageKind::Redirect,
        PageKind::Acknowledgement,
        PageKind::PhishingWarning,
        PageKind::WeakPassword,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            PageKind::TypoWarning => "typo_warning.html",
            PageKind::Redirect => "redirect.html",
            PageKind::Acknowledgement => "acknowledgement.html",
            PageKind::PhishingWarning => "phishing_warning.html",
            PageKind::WeakPassword => "weak_password.html",
        }
    }

    fn builtin(self) -> &'static str {
        match self {
            PageKind::TypoWarning => include_str!("../../templates/typo_warning.html"),
            PageKind::Redirect => include_str!("../../templates/redirect.html"),
            PageKind::Acknowledgement => include_str!("../../templates/acknowledgement.html"),
            PageKind::PhishingWarning => include_str!("../../templates/phishing_warning.html"),
            PageKind::WeakPassword => include_str!("../../templates/weak_password.html"),
        }
    }
}

/// Template sources keyed by page
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    pages: HashMap<PageKind, String>,
}

impl TemplateSet {
    /// No pages at all; every render yields `None`
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let pages = PageKind::ALL
            .iter()
            .map(|kind| (*kind, kind.builtin().to_string()))
            .collect();
        Self { pages }
    }

    /// Built-in pages, overridden by files present in `dir`
    ///
    /// A file that exists but cannot be read leaves its page missing.
    pub fn load(dir: Option<&Path>) -> Self {
        let mut set = Self::builtin();
        let Some(dir) = dir else {
            return set;
        };

        for kind in PageKind::ALL {
            let path = dir.join(kind.file_name());
            if !path.exists() {
                continue;
            }
            match fs::read_to_string(&path) {
                Ok(text) => {
                    tracing::debug!(path = %path.display(), "Loaded page template override");
                    set.pages.insert(kind, text);
                }
                Err(source) => {
                    let err = TemplateError::ReadError {
                        path: path.display().to_string(),
                        source,
                    };
                    tracing::error!(error = %err, "{}", err.user_hint());
                    set.pages.remove(&kind);
                }
            }
        }
        set
    }

    pub fn with_page(mut self, kind: PageKind, text: impl Into<String>) -> Self {
        self.pages.insert(kind, text.into());
        self
    }

    pub fn source(&self, kind: PageKind) -> Result<&str, TemplateError> {
        self.pages
            .get(&kind)
            .map(String::as_str)
            .ok_or_else(|| TemplateError::NotFound(kind.file_name().to_string()))
    }

    /// Substitute placeholders
    ///
    /// `[Name]` gets the HTML-escaped value, `[Name|url]` the percent-encoded one.
    pub fn render(&self, kind: PageKind, values: &[(&str, &str)]) -> Option<String> {
        let source = match self.source(kind) {
            Ok(source) => source,
            Err(e) => {
                let e = GuardError::from(e);
                tracing::warn!(error = %e, "{}", e.user_message());
                return None;
            }
        };

        let mut page = source.to_string();
        for (placeholder, value) in values {
            let name = placeholder.trim_start_matches('[').trim_end_matches(']');
            page = page.replace(&format!("[{}|url]", name), &urlencoding::encode(value));
            page = page.replace(placeholder, &escape_html(value));
        }
        Some(page)
    }

    pub fn typo_warning(&self, typo_host: &str, origin_page: &str) -> Option<String> {
        self.render(
            PageKind::TypoWarning,
            &[("[TypoHost]", typo_host), ("[OriginPage]", origin_page)],
        )
    }

    pub fn redirect(&self, redirect_host: &str) -> Option<String> {
        self.render(PageKind::Redirect, &[("[RedirectHost]", redirect_host)])
    }

    pub fn acknowledgement(&self, action: &str) -> Option<String> {
        self.render(PageKind::Acknowledgement, &[("[Action]", action)])
    }

    pub fn phishing_warning(
        &self,
        phishing_host: &str,
        cre_used_host: &str,
        username: &str,
        token: &str,
    ) -> Option<String> {
        self.render(
            PageKind::PhishingWarning,
            &[
                ("[PhishingHost]", phishing_host),
                ("[CreUsedHost]", cre_used_host),
                ("[Username]", username),
                ("[UUID]", token),
            ],
        )
    }

    pub fn weak_password(&self, host: &str, username: &str, reason: &str) -> Option<String> {
        self.render(
            PageKind::WeakPassword,
            &[
                ("[PhishingHost]", host),
                ("[Username]", username),
                ("[Reason]", reason),
            ],
        )
    }
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
