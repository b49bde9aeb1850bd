use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Doctolib,
}

impl Provider {
    pub const ALL: [Provider; 1] = [Provider::Doctolib];

    pub fn as_slug(&self) -> &'static str {
        match self {
            Self::Doctolib => "doctolib",
        }
    }
}

impl Display for Provider {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let display = match self {
            Self::Doctolib => "Doctolib",
        };
        write!(f, "{display}")
    }
}

#[derive(Debug, Error)]
#[error("unknown provider: {0}")]
pub struct ProviderParseError(pub String);

impl FromStr for Provider {
    type Err = ProviderParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Provider::ALL
            .into_iter()
            .find(|p| p.as_slug() == normalized)
            .ok_or_else(|| ProviderParseError(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceIdentity {
    pub provider: Provider,
    pub id: String,
    pub qualifier: Option<String>,
}

impl SourceIdentity {
    pub fn new(provider: Provider, id: impl Into<String>) -> Self {
        Self {
            provider,
            id: id.into(),
            qualifier: None,
        }
    }

    pub fn qualified(&self, key: &str, value: impl Display) -> Self {
        Self {
            provider: self.provider,
            id: self.id.clone(),
            qualifier: Some(format!("{key}={value}")),
        }
    }

    pub fn base(&self) -> Self {
        Self::new(self.provider, self.id.clone())
    }

    pub fn is_qualified(&self) -> bool {
        self.qualifier.is_some()
    }
}

impl Display for SourceIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.provider.as_slug(), self.id)?;
        if let Some(qualifier) = &self.qualifier {
            write!(f, "?{qualifier}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum IdentityParseError {
    #[error("source identity has no scheme: {0}")]
    MissingScheme(String),
    #[error("source identity has an empty id: {0}")]
    EmptyId(String),
    #[error(transparent)]
    Provider(#[from] ProviderParseError),
}

impl FromStr for SourceIdentity {
    type Err = IdentityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| IdentityParseError::MissingScheme(s.to_string()))?;
        let provider = scheme.parse::<Provider>()?;
        let (id, qualifier) = match rest.split_once('?') {
            Some((id, qualifier)) => (id, Some(qualifier.to_string())),
            None => (rest, None),
        };
        if id.is_empty() {
            return Err(IdentityParseError::EmptyId(s.to_string()));
        }
        Ok(Self {
            provider,
            id: id.to_string(),
            qualifier,
        })
    }
}
