use crate::error::{CuratorError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Deepest category path a dataset image may be filed under.
pub const MAX_DEPTH: usize = 3;

/// Ordered category path, main category first. Always 1..=3 valid levels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Hierarchy(Vec<String>);

impl Hierarchy {
    pub fn new<I, S>(levels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let levels: Vec<String> = levels
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .collect();
        if levels.is_empty() {
            return Err(CuratorError::InvalidInput("hierarchy is empty".into()));
        }
        if levels.len() > MAX_DEPTH {
            return Err(CuratorError::InvalidInput(format!(
                "hierarchy has {} levels, at most {MAX_DEPTH} allowed",
                levels.len()
            )));
        }
        for level in &levels {
            validate_level(level)?;
        }
        Ok(Self(levels))
    }

    /// Builds a hierarchy from the main/sub/sub-sub form fields. Blank fields
    /// are dropped, but a deeper level may not be given without its parent.
    pub fn from_parts(main: &str, sub: Option<&str>, sub_sub: Option<&str>) -> Result<Self> {
        let sub = sub.map(str::trim).filter(|s| !s.is_empty());
        let sub_sub = sub_sub.map(str::trim).filter(|s| !s.is_empty());
        if sub.is_none() && sub_sub.is_some() {
            return Err(CuratorError::InvalidInput(
                "sub-sub category given without a sub category".into(),
            ));
        }
        let levels: Vec<&str> = std::iter::once(main).chain(sub).chain(sub_sub).collect();
        Self::new(levels)
    }

    pub fn levels(&self) -> &[String] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn leaf(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    pub fn parent(&self) -> Option<Hierarchy> {
        if self.0.len() > 1 {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        } else {
            None
        }
    }

    /// Whether `self` is `other` or sits somewhere beneath it.
    pub fn starts_with(&self, other: &Hierarchy) -> bool {
        self.0.starts_with(&other.0)
    }
}

fn validate_level(level: &str) -> Result<()> {
    if level.is_empty() {
        return Err(CuratorError::InvalidInput("empty category level".into()));
    }
    if level == "." || level == ".." || level.contains('/') || level.contains('\\') {
        return Err(CuratorError::InvalidInput(format!(
            "category level {level:?} is not a valid folder name"
        )));
    }
    Ok(())
}

impl TryFrom<Vec<String>> for Hierarchy {
    type Error = CuratorError;

    fn try_from(levels: Vec<String>) -> Result<Self> {
        Self::new(levels)
    }
}

impl From<Hierarchy> for Vec<String> {
    fn from(h: Hierarchy) -> Self {
        h.0
    }
}

impl FromStr for Hierarchy {
    type Err = CuratorError;

    /// Parses `main/sub/subsub`.
    fn from_str(s: &str) -> Result<Self> {
        Self::new(s.trim().trim_matches('/').split('/'))
    }
}

impl fmt::Display for Hierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}
