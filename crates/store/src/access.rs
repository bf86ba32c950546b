//! Per-target permission masks with an implicit admin.

use std::{
    fmt,
    ops::{BitOr, BitOrAssign},
    sync::Arc,
};

use crate::{Error, Result, kv::KvStore};

/// Permission bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Access(u32);

impl Access {
    pub const NONE: Self = Self(0);
    /// Chat assistant features.
    pub const GPT: Self = Self(1 << 0);

    const NAMES: &'static [(&'static str, Self)] = &[("gpt", Self::GPT)];

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether any bit of `other` is set.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Parse names such as `gpt` or `gpt|other`.
    ///
    /// `""`, `no` and `none` mean no permission; unknown names contribute
    /// nothing, so an all-unknown input parses as [`Access::NONE`].
    pub fn parse(input: &str) -> Self {
        input
            .split('|')
            .map(|part| part.trim().to_lowercase())
            .filter_map(|name| {
                Self::NAMES
                    .iter()
                    .find(|(n, _)| *n == name)
                    .map(|(_, access)| *access)
            })
            .fold(Self::NONE, |acc, a| acc | a)
    }
}

impl BitOr for Access {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Access {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("no");
        }
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(_, access)| self.intersects(*access))
            .map(|(name, _)| *name)
            .collect();
        if names.is_empty() {
            f.write_str("unknown")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

/// One stored assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessEntry {
    pub target: String,
    pub access: Access,
}

const KEY_PREFIX: &str = "access:";

/// Reads and writes `access:<target>` masks.
///
/// The admin always has every permission; writes for the admin are ignored
/// and never persisted.
pub struct AccessService {
    kv: Arc<dyn KvStore>,
    admin: String,
}

impl AccessService {
    pub fn new(kv: Arc<dyn KvStore>, admin: impl Into<String>) -> Self {
        Self {
            kv,
            admin: admin.into(),
        }
    }

    pub fn is_admin(&self, target: &str) -> bool {
        !self.admin.is_empty() && target == self.admin
    }

    pub fn admin(&self) -> &str {
        &self.admin
    }

    pub async fn get_access(&self, target: &str) -> Result<Access> {
        let key = format!("{KEY_PREFIX}{target}");
        match self.kv.get(&key).await? {
            None => Ok(Access::NONE),
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .map(Access::from_bits)
                .map_err(|_| Error::corrupt(key, raw)),
        }
    }

    pub async fn set_access(&self, target: &str, access: Access) -> Result<()> {
        if self.is_admin(target) {
            return Ok(());
        }
        self.kv
            .set(
                &format!("{KEY_PREFIX}{target}"),
                &access.bits().to_string(),
                None,
            )
            .await
    }

    pub async fn add_access(&self, target: &str, access: Access) -> Result<()> {
        if self.is_admin(target) {
            return Ok(());
        }
        let current = self.get_access(target).await?;
        self.set_access(target, current | access).await
    }

    pub async fn del_access(&self, target: &str, access: Access) -> Result<()> {
        if self.is_admin(target) {
            return Ok(());
        }
        let current = self.get_access(target).await?;
        self.set_access(target, current.without(access)).await
    }

    pub async fn has_access(&self, target: &str, access: Access) -> Result<bool> {
        if self.is_admin(target) {
            return Ok(true);
        }
        Ok(self.get_access(target).await?.intersects(access))
    }

    /// Every stored assignment, sorted by target.
    pub async fn list_all(&self) -> Result<Vec<AccessEntry>> {
        let mut entries = Vec::new();
        for key in self.kv.keys(KEY_PREFIX).await? {
            let target = key.strip_prefix(KEY_PREFIX).unwrap_or(&key).to_string();
            let access = self.get_access(&target).await?;
            entries.push(AccessEntry { target, access });
        }
        Ok(entries)
    }
}
