//! Pull request references

use eyre::{Result, eyre};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// owner/repo#number
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrRef {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl PrRef {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, number: u64) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            number,
        }
    }

    /// Session key used by the session store
    pub fn session_key(&self) -> String {
        sessionstore::SessionStore::key_for(&self.owner, &self.repo, self.number)
    }

    /// Parse `owner/repo#N`, `owner/repo/N`, `owner/repo/pull/N` or a GitHub URL
    pub fn parse(input: &str) -> Result<Self> {
        debug!(%input, "PrRef::parse: called");
        let trimmed = input.trim().trim_end_matches('/');
        let path = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
            .map(|rest| rest.split_once('/').map(|(_, p)| p).unwrap_or(""))
            .unwrap_or(trimmed);

        let (repo_part, number) = if let Some((left, num)) = path.rsplit_once('#') {
            (left.to_string(), num)
        } else {
            let parts: Vec<&str> = path.split('/').collect();
            match parts.as_slice() {
                [owner, repo, "pull", num] | [owner, repo, "pulls", num] => (format!("{}/{}", owner, repo), *num),
                [owner, repo, num] => (format!("{}/{}", owner, repo), *num),
                _ => return Err(eyre!("Unrecognized pull request reference: {}", input)),
            }
        };

        let number: u64 = number
            .parse()
            .map_err(|_| eyre!("Invalid pull request number in: {}", input))?;
        let (owner, repo) = repo_part
            .split_once('/')
            .filter(|(o, r)| !o.is_empty() && !r.is_empty() && !r.contains('/'))
            .ok_or_else(|| eyre!("Expected owner/repo in: {}", input))?;

        Ok(Self::new(owner, repo.trim_end_matches(".git"), number))
    }
}

impl FromStr for PrRef {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for PrRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        let expected = PrRef::new("octo", "widgets", 42);
        for input in [
            "octo/widgets#42",
            "octo/widgets/42",
            "octo/widgets/pull/42",
            "https://github.com/octo/widgets/pull/42",
            "https://github.com/octo/widgets/pull/42/",
        ] {
            assert_eq!(PrRef::parse(input).unwrap(), expected, "input {}", input);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(PrRef::parse("widgets#42").is_err());
        assert!(PrRef::parse("octo/widgets#abc").is_err());
        assert!(PrRef::parse("octo/widgets").is_err());
        assert!(PrRef::parse("").is_err());
    }

    #[test]
    fn test_display_and_key() {
        let pr = PrRef::new("octo", "widgets", 7);
        assert_eq!(pr.to_string(), "octo/widgets#7");
        assert_eq!(pr.session_key(), "octo__widgets__pr-7");
    }
}
