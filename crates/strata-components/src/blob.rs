//! Blob metadata and media types

use serde::{Deserialize, Serialize};
use std::fmt;
use strata_core::{Error, Result};

/// Media type of gzip compressed blobs
pub const MEDIA_TYPE_GZIP: &str = "application/gzip";

/// Media type of uncompressed blueprint archives
pub const BLUEPRINT_MEDIA_TYPE: &str = "application/vnd.gardener.landscaper.blueprint.v1+tar";

/// Media type of gzip compressed blueprint archives
pub const BLUEPRINT_MEDIA_TYPE_GZIP: &str =
    "application/vnd.gardener.landscaper.blueprint.v1+tar+gzip";

/// Metadata of a fetched blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobInfo {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
}

/// A parsed media type: `type/subtype[+suffix...][; params]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    pub type_: String,
    pub subtype: String,
    /// Structured syntax suffixes in order, e.g. `["tar", "gzip"]`
    pub suffixes: Vec<String>,
}

impl MediaType {
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |message: &str| Error::InvalidMediaType {
            media_type: input.to_string(),
            message: message.to_string(),
        };

        let essence = input.split(';').next().unwrap_or_default().trim();
        let (type_, rest) = essence
            .split_once('/')
            .ok_or_else(|| invalid("expected type/subtype"))?;
        if type_.is_empty() || rest.is_empty() {
            return Err(invalid("type and subtype must not be empty"));
        }

        let mut parts = rest.split('+');
        let subtype = parts.next().unwrap_or_default();
        let suffixes: Vec<String> = parts.map(|s| s.to_ascii_lowercase()).collect();
        if subtype.is_empty() || suffixes.iter().any(String::is_empty) {
            return Err(invalid("empty subtype or suffix"));
        }

        Ok(Self {
            type_: type_.to_ascii_lowercase(),
            subtype: subtype.to_ascii_lowercase(),
            suffixes,
        })
    }

    /// `type/subtype` without suffixes
    pub fn base(&self) -> String {
        format!("{}/{}", self.type_, self.subtype)
    }

    /// Whether the content is gzip compressed
    pub fn is_gzip(&self) -> bool {
        let base = self.base();
        base == MEDIA_TYPE_GZIP
            || base == "application/x-gzip"
            || self.suffixes.last().is_some_and(|s| s == "gzip" || s == "gz")
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.type_, self.subtype)?;
        for s in &self.suffixes {
            write!(f, "+{}", s)?;
        }
        Ok(())
    }
}
