// ABOUTME: DNS-compatible project slug validation.
// ABOUTME: Ensures slugs follow RFC 1123 label requirements so they can prefix subdomains.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SlugError {
    #[error("slug cannot be empty")]
    Empty,

    #[error("slug exceeds maximum length of 63 characters")]
    TooLong,

    #[error("slug cannot start with a hyphen")]
    StartsWithHyphen,

    #[error("slug cannot end with a hyphen")]
    EndsWithHyphen,

    #[error("slug must be lowercase")]
    NotLowercase,

    #[error("invalid character in slug: '{0}'")]
    InvalidChar(char),
}

/// A project slug: the stable, DNS-safe name all generated subdomains
/// derive from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Slug(String);

impl Slug {
    pub fn new(value: &str) -> Result<Self, SlugError> {
        if value.is_empty() {
            return Err(SlugError::Empty);
        }

        if value.len() > 63 {
            return Err(SlugError::TooLong);
        }

        if value.starts_with('-') {
            return Err(SlugError::StartsWithHyphen);
        }

        if value.ends_with('-') {
            return Err(SlugError::EndsWithHyphen);
        }

        for c in value.chars() {
            if c.is_ascii_uppercase() {
                return Err(SlugError::NotLowercase);
            }
            if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
                return Err(SlugError::InvalidChar(c));
            }
        }

        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Validated on the way in: a slug never deserializes into an invalid value.

impl serde::Serialize for Slug {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Slug {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value: String = serde::Deserialize::deserialize(deserializer)?;
        Slug::new(&value).map_err(serde::de::Error::custom)
    }
}
