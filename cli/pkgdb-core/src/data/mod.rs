use std::fmt::Display;

pub type System = String;

/// Different representations of the same attribute path
#[derive(Debug, Clone)]
pub enum AttrPath {
    Parts(Vec<String>),
    Joined(String),
}

impl AttrPath {
    /// The components of the path, split on `.`
    pub fn parts(&self) -> Vec<String> {
        match self {
            AttrPath::Parts(parts) => parts.clone(),
            AttrPath::Joined(joined) if joined.is_empty() => Vec::new(),
            AttrPath::Joined(joined) => joined.split('.').map(str::to_string).collect(),
        }
    }

    /// The final component of the path, e.g. `requests` for
    /// `python3Packages.requests`
    pub fn last(&self) -> Option<String> {
        self.parts().pop()
    }
}

impl From<Vec<String>> for AttrPath {
    fn from(value: Vec<String>) -> Self {
        AttrPath::Parts(value)
    }
}

impl From<&str> for AttrPath {
    fn from(value: &str) -> Self {
        AttrPath::Joined(value.to_string())
    }
}

impl From<String> for AttrPath {
    fn from(value: String) -> Self {
        AttrPath::Joined(value)
    }
}

impl From<AttrPath> for String {
    fn from(value: AttrPath) -> Self {
        match value {
            AttrPath::Parts(parts) => parts.join("."),
            AttrPath::Joined(s) => s,
        }
    }
}

impl Display for AttrPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <AttrPath as Into<String>>::into(self.clone()).fmt(f)
    }
}

impl PartialEq for AttrPath {
    fn eq(&self, other: &Self) -> bool {
        self.parts() == other.parts()
    }
}
