//! Repository coordinates parsed from user input.

use std::fmt;

use url::Url;

use crate::util::is_http_url;
use crate::{Error, Result};

/// `owner/repo` pair identifying the backup repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

impl RepoRef {
    /// Accepts `owner/repo` or an `https://host/owner/repo(.git)` URL.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::Validation(
                "repository must not be empty".to_string(),
            ));
        }

        let (owner, repo) = if is_http_url(input) {
            let url = Url::parse(input)
                .map_err(|error| Error::Validation(format!("invalid repository URL: {error}")))?;
            let segments: Vec<&str> = url
                .path_segments()
                .map(|segments| segments.filter(|segment| !segment.is_empty()).collect())
                .unwrap_or_default();
            if segments.len() < 2 {
                return Err(Error::Validation(format!(
                    "repository URL must include owner and repository: {input}"
                )));
            }
            (segments[0].to_string(), segments[1].to_string())
        } else {
            let parts: Vec<&str> = input.split('/').collect();
            if parts.len() != 2 {
                return Err(Error::Validation(format!(
                    "repository must be `owner/repo` or an https URL: {input}"
                )));
            }
            (parts[0].to_string(), parts[1].to_string())
        };

        let repo = repo.strip_suffix(".git").unwrap_or(&repo).to_string();
        validate_segment(&owner, "owner")?;
        validate_segment(&repo, "repository")?;
        Ok(Self { owner, repo })
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

fn validate_segment(value: &str, label: &str) -> Result<()> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::Validation(format!("invalid {label} name: {value:?}")))
    }
}
