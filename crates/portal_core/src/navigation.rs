use std::fmt;

use shared::{protocol::CLOUBER_LANG, OrderedMap};
use url::Url;

use crate::{config::PortalConfig, error::ConfigurationError};

/// Query parameter crawlers use in place of the `#!` fragment.
pub const ESCAPED_FRAGMENT: &str = "_escaped_fragment_";

/// `{app, page, lang}` decoded from a `#!app/page&k=v` fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageNavigationState {
    pub app: String,
    pub page: String,
    pub lang: Option<String>,
}

impl PageNavigationState {
    pub fn new(app: impl Into<String>, page: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            page: page.into(),
            lang: None,
        }
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }

    /// `app/page`, the value carried as `CLOUBER_PATH`.
    pub fn path(&self) -> String {
        format!("{}/{}", self.app, self.page)
    }

    pub fn same_page(&self, other: &Self) -> bool {
        self.app == other.app && self.page == other.page
    }
}

impl fmt::Display for PageNavigationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#!{}/{}", self.app, self.page)?;
        if let Some(lang) = &self.lang {
            write!(f, "&{CLOUBER_LANG}={lang}")?;
        }
        Ok(())
    }
}

/// A navigation target as typed by the user, before defaults are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationTarget {
    pub app: Option<String>,
    pub page: Option<String>,
    /// Everything after the path, minus `CLOUBER_LANG`.
    pub parameters: OrderedMap<String, String>,
    pub lang: Option<String>,
}

impl NavigationTarget {
    /// Accepts a full url, `#!app/page&k=v`, `!app/page`, `app/page` or the
    /// crawler form `?_escaped_fragment_=app/page&k=v`.
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if let Ok(url) = Url::parse(input) {
            return Self::from_url(&url);
        }
        if let Some(query) = input.strip_prefix('?') {
            if let Some(fragment) = escaped_fragment(query) {
                return Self::parse_fragment(&fragment);
            }
        }
        Self::parse_fragment(input)
    }

    fn from_url(url: &Url) -> Self {
        if let Some(fragment) = url.fragment().filter(|fragment| !fragment.is_empty()) {
            return Self::parse_fragment(fragment);
        }
        url.query()
            .and_then(escaped_fragment)
            .map(|fragment| Self::parse_fragment(&fragment))
            .unwrap_or_default()
    }

    fn parse_fragment(fragment: &str) -> Self {
        let fragment = fragment.trim_start_matches('#').trim_start_matches('!');
        let (path, query) = fragment.split_once('&').unwrap_or((fragment, ""));

        let mut segments = path
            .split('/')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(str::to_string);
        let app = segments.next();
        let page = segments.next();

        let mut parameters = OrderedMap::parse_query(query);
        let lang = parameters
            .remove(CLOUBER_LANG)
            .filter(|lang| !lang.trim().is_empty());

        Self {
            app,
            page,
            parameters,
            lang,
        }
    }

    /// Fills in the configured default app and page.
    pub fn resolve(&self, config: &PortalConfig) -> Result<PageNavigationState, ConfigurationError> {
        let app_name = match self.app.as_deref() {
            Some(app) => app,
            None => config
                .default_app_name()
                .ok_or_else(|| ConfigurationError::AppNotFound(String::new()))?,
        };
        let app = config.app(app_name)?;
        let page = match self.page.as_deref() {
            Some(page) => page.to_string(),
            None => app
                .default_page_name()
                .ok_or_else(|| ConfigurationError::PageNotFound {
                    app: app.name.clone(),
                    page: String::new(),
                })?
                .to_string(),
        };
        config.page(&app.name, &page)?;

        Ok(PageNavigationState {
            app: app.name.clone(),
            page,
            lang: self.lang.clone(),
        })
    }
}

fn escaped_fragment(query: &str) -> Option<String> {
    // The value itself carries `&k=v` pairs, so everything after the key is taken.
    let key = format!("{ESCAPED_FRAGMENT}=");
    let start = if query.starts_with(&key) {
        0
    } else {
        query.find(&format!("&{key}"))? + 1
    };
    let rest = &query[start + key.len()..];
    let decoded = urlencoding::decode(&rest.replace('+', " "))
        .map(|value| value.into_owned())
        .unwrap_or_else(|_| rest.to_string());
    Some(decoded)
}
