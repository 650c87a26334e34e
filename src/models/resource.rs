// src/models/resource.rs

//! Fetchable resources and the enumeration checkpoint.

use std::collections::HashSet;

use url::Url;

use crate::error::{AppError, Result};

/// A fetchable URL and the stable key its destination is named by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub url: String,
    pub key: String,
}

impl ResourceRef {
    /// Build a reference keyed by the terminal path segment of `url`.
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed = Url::parse(url.trim())?;
        let key = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .ok_or_else(|| {
                AppError::validation(format!("URL has no terminal path segment: {url}"))
            })?;

        Ok(Self {
            url: parsed.to_string(),
            key: key.to_string(),
        })
    }
}

/// Body of a successful fetch.
#[derive(Debug, Clone)]
pub struct Fetched {
    /// URL the request was sent to
    pub url: String,
    /// Response body
    pub bytes: Vec<u8>,
    /// Attempts spent, the successful one included
    pub attempts: u32,
}

/// Ordered, key-unique list of resources produced by one enumeration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    refs: Vec<ResourceRef>,
}

impl Manifest {
    /// Build a manifest, keeping the first occurrence of every key.
    pub fn new(refs: impl IntoIterator<Item = ResourceRef>) -> Self {
        let mut seen = HashSet::new();
        let refs = refs
            .into_iter()
            .filter(|r| {
                let fresh = seen.insert(r.key.clone());
                if !fresh {
                    log::warn!("Duplicate key {} dropped ({})", r.key, r.url);
                }
                fresh
            })
            .collect();
        Self { refs }
    }

    /// Parse the newline-delimited checkpoint format. Blank lines are ignored.
    pub fn parse(text: &str) -> Result<Self> {
        let refs = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ResourceRef::from_url)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(refs))
    }

    /// Render the checkpoint format: one URL per line.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for r in &self.refs {
            out.push_str(&r.url);
            out.push('\n');
        }
        out
    }

    pub fn refs(&self) -> &[ResourceRef] {
        &self.refs
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}
