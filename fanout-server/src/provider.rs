//! The closed set of provider names the relay accepts.

use crate::error::RelayError;

/// Pseudo-provider that expands to every configured provider.
pub const GROUP: &str = "group";

#[derive(Debug, Clone)]
pub struct ProviderSet {
    providers: Vec<String>,
}

impl ProviderSet {
    pub fn new<I, S>(providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list: Vec<String> = Vec::new();
        for p in providers {
            let p = p.into().trim().to_string();
            if !p.is_empty() && p != GROUP && !list.contains(&p) {
                list.push(p);
            }
        }
        Self { providers: list }
    }

    pub fn all(&self) -> &[String] {
        &self.providers
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.iter().any(|p| p == name)
    }

    /// Resolve a single requested name: `group` becomes the whole set,
    /// anything outside the set is rejected.
    pub fn resolve(&self, requested: &str) -> Result<Vec<String>, RelayError> {
        if requested == GROUP {
            return Ok(self.providers.clone());
        }
        if self.contains(requested) {
            Ok(vec![requested.to_string()])
        } else {
            Err(RelayError::InvalidProvider(requested.to_string()))
        }
    }

    /// Lenient resolution used by brainstorm: unknown names are dropped,
    /// and an empty result (or an explicit `group`) means every provider.
    pub fn filter(&self, requested: &[String]) -> Vec<String> {
        if requested.iter().any(|p| p == GROUP) && requested.len() == 1 {
            return self.providers.clone();
        }
        let known: Vec<String> = requested
            .iter()
            .filter(|p| self.contains(p))
            .cloned()
            .collect();
        if known.is_empty() {
            self.providers.clone()
        } else {
            known
        }
    }
}
