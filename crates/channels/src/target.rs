use std::fmt;

/// Where a message goes: a group id or a user id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SendTarget(String);

impl SendTarget {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }

    pub fn is_group(&self) -> bool {
        self.0.ends_with("@chatroom")
    }
}

impl From<&str> for SendTarget {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SendTarget {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for SendTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
