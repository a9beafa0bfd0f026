use tidemark_common::{Error, Result};
use tidemark_config::ConnectionUrl;
use tracing::debug;

use crate::driver::Driver;

/// Opens a driver from a full connection URL.
pub type Opener = fn(&str) -> Result<Box<dyn Driver>>;

/// Maps URL schemes to driver constructors.
///
/// Built explicitly at startup and handed to the orchestration engine.
/// Registration order is preserved and a scheme can be registered once.
#[derive(Default)]
pub struct Registry {
    entries: Vec<(String, Opener)>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, scheme: &str, opener: Opener) -> Result<()> {
        let scheme = scheme.to_ascii_lowercase();
        if self.contains(&scheme) {
            return Err(Error::DuplicateDriver(scheme));
        }
        debug!(%scheme, "driver registered");
        self.entries.push((scheme, opener));
        Ok(())
    }

    pub fn contains(&self, scheme: &str) -> bool {
        self.entries
            .iter()
            .any(|(known, _)| known.eq_ignore_ascii_case(scheme))
    }

    /// Registered schemes in registration order.
    pub fn schemes(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(scheme, _)| scheme.as_str())
    }

    pub fn open(&self, url: &str) -> Result<Box<dyn Driver>> {
        let parsed = ConnectionUrl::parse(url)?;
        let (_, opener) = self
            .entries
            .iter()
            .find(|(scheme, _)| scheme == parsed.scheme())
            .ok_or_else(|| Error::UnknownDriver(parsed.scheme().to_string()))?;
        opener(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refuse(url: &str) -> Result<Box<dyn Driver>> {
        Err(Error::Url(format!("refused {url}")))
    }

    #[test]
    fn duplicate_scheme_is_rejected() {
        let mut registry = Registry::new();
        registry.register("sqlite", refuse).unwrap();
        let err = registry.register("SQLite", refuse).unwrap_err();
        assert!(matches!(err, Error::DuplicateDriver(scheme) if scheme == "sqlite"));
    }

    #[test]
    fn schemes_keep_registration_order() {
        let mut registry = Registry::new();
        registry.register("postgres", refuse).unwrap();
        registry.register("mongodb", refuse).unwrap();
        registry.register("sqlite", refuse).unwrap();
        assert_eq!(
            registry.schemes().collect::<Vec<_>>(),
            vec!["postgres", "mongodb", "sqlite"]
        );
    }

    #[test]
    fn open_dispatches_on_scheme() {
        let mut registry = Registry::new();
        registry.register("postgres", refuse).unwrap();

        let err = registry.open("postgres://localhost/app").err().unwrap();
        assert_eq!(
            err.to_string(),
            "invalid connection url: refused postgres://localhost/app"
        );

        let err = registry.open("mysql://localhost/app").err().unwrap();
        assert!(matches!(err, Error::UnknownDriver(scheme) if scheme == "mysql"));
    }
}
