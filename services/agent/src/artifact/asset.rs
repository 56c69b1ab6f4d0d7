//! Release assets and the attributes derived from their file names.

use serde::{Deserialize, Serialize};

use super::platform::{Architecture, Platform};

/// One downloadable file of a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// File name as published upstream, e.g. `menmosd-linux-amd64.tar.gz`.
    pub full_name: String,
    /// Where the file can be fetched from.
    pub download_url: String,
}

impl Asset {
    pub fn new(full_name: impl Into<String>, download_url: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            download_url: download_url.into(),
        }
    }

    /// File name with its last extension removed.
    ///
    /// `bing.tar.gz` -> `bing.tar`, `bingbong` -> `bingbong`.
    pub fn stem(&self) -> &str {
        match self.full_name.rfind('.') {
            Some(pos) => &self.full_name[..pos],
            None => &self.full_name,
        }
    }

    /// Logical binary name: the stem up to its first dash, without any
    /// remaining extension.
    ///
    /// `menmosd-linux-amd64.tar.gz` -> `menmosd`, `bing.tar.gz` -> `bing`. An
    /// asset with an empty stem is named `unknown`.
    pub fn name(&self) -> &str {
        let stem = self.stem();
        if stem.is_empty() {
            return "unknown";
        }
        let head = stem.split('-').next().unwrap_or(stem);
        head.split('.').next().unwrap_or(head)
    }

    /// Architecture tagged anywhere in the file name as `-<alias>`.
    pub fn architecture(&self) -> Architecture {
        Architecture::KNOWN
            .into_iter()
            .find(|arch| {
                arch.aliases()
                    .iter()
                    .any(|alias| self.full_name.contains(&format!("-{alias}")))
            })
            .unwrap_or(Architecture::Unknown)
    }

    /// Platform tagged in the file name as `-<alias>` followed by `-` or `.`.
    ///
    /// The trailing delimiter keeps e.g. `-windows10` from matching.
    pub fn platform(&self) -> Platform {
        Platform::KNOWN
            .into_iter()
            .find(|platform| {
                platform
                    .aliases()
                    .iter()
                    .any(|alias| has_delimited_token(&self.full_name, alias))
            })
            .unwrap_or(Platform::Unknown)
    }
}

/// Whether `name` contains `-<token>` immediately followed by `-` or `.`.
fn has_delimited_token(name: &str, token: &str) -> bool {
    let needle = format!("-{token}");
    name.match_indices(&needle).any(|(pos, _)| {
        matches!(
            name.as_bytes().get(pos + needle.len()),
            Some(b'-') | Some(b'.')
        )
    })
}
