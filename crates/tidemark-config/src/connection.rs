use tidemark_common::{Error, Result};
use url::form_urlencoded;

/// Prefix of query parameters consumed by the driver itself.
const PRIVATE_PARAM_PREFIX: &str = "x-";

/// A connection URL split into scheme, location and decoded query parameters.
///
/// Parsing is deliberately looser than RFC 3986: MongoDB seed lists
/// (`host1:1,host2:2`) and SQLite paths (`sqlite://./app.db`,
/// `sqlite::memory:`) are accepted as-is in the location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionUrl {
    scheme: String,
    location: String,
    authority: bool,
    params: Vec<(String, String)>,
}

impl ConnectionUrl {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (scheme, rest, authority) = match raw.split_once("://") {
            Some((scheme, rest)) => (scheme, rest, true),
            None => match raw.split_once(':') {
                Some((scheme, rest)) => (scheme, rest, false),
                None => return Err(Error::Url(format!("missing scheme in {raw:?}"))),
            },
        };

        if scheme.is_empty()
            || !scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            return Err(Error::Url(format!("invalid scheme in {raw:?}")));
        }

        let (location, query) = rest.split_once('?').unwrap_or((rest, ""));
        let params = form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            location: location.to_string(),
            authority,
            params,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Everything between the scheme separator and the query string.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// First value of a query parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Path following the authority, e.g. `app` in `mongodb://host:27017/app`.
    pub fn database(&self) -> Option<&str> {
        if !self.authority {
            return None;
        }
        self.location
            .split_once('/')
            .map(|(_, path)| path.trim_matches('/'))
            .filter(|path| !path.is_empty())
    }

    /// The URL with every driver-private (`x-`) parameter removed.
    pub fn filtered(&self) -> String {
        self.render(
            self.params
                .iter()
                .filter(|(key, _)| !key.starts_with(PRIVATE_PARAM_PREFIX))
                .map(|(key, value)| (key.as_str(), value.as_str())),
        )
    }

    /// The full URL with `overrides` replacing existing values of the same keys.
    pub fn with_params(&self, overrides: &[(&str, &str)]) -> String {
        let kept = self
            .params
            .iter()
            .filter(|(key, _)| !overrides.iter().any(|(name, _)| name == key))
            .map(|(key, value)| (key.as_str(), value.as_str()));
        self.render(kept.chain(overrides.iter().copied()))
    }

    fn render<'a>(&self, params: impl Iterator<Item = (&'a str, &'a str)>) -> String {
        let separator = if self.authority { "://" } else { ":" };
        let mut url = format!("{}{separator}{}", self.scheme, self.location);
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }
        url
    }

    /// The filtered URL with any password replaced, for log output.
    pub fn redacted(&self) -> String {
        let filtered = self.filtered();
        let Some((head, tail)) = filtered.split_once("://") else {
            return filtered;
        };
        let host_end = tail.find('/').unwrap_or(tail.len());
        match tail[..host_end].rfind('@') {
            Some(at) => {
                let userinfo = &tail[..at];
                let user = userinfo.split_once(':').map_or(userinfo, |(user, _)| user);
                format!("{head}://{user}:***{}", &tail[at..])
            }
            None => filtered,
        }
    }
}
