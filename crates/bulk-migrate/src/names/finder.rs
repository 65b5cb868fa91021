//! Collision-free name allocation.
//!
//! A [`UniqueNameFinder`] owns a private copy of every name already taken in
//! its namespace, lowercased. Usernames and group names share one namespace
//! ([`UserGroupNameFinder`]); categories and badges each have their own.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::sanitize::{
    clean_display_name_tail, clean_username_tail, sanitize_display_name, sanitize_username,
    truncate_chars,
};
use super::suffix::{next_name, SuffixFinder};
use crate::error::Result;
use crate::shared_data::{SharedData, BADGE_NAMES, CATEGORY_NAMES, GROUP_NAMES, USERNAMES};

pub const MAX_USERNAME_LENGTH: usize = 60;
pub const MAX_CATEGORY_NAME_LENGTH: usize = 50;
pub const MAX_BADGE_NAME_LENGTH: usize = 100;

/// How one kind of name is normalized.
#[derive(Debug, Clone, Copy)]
pub struct NameRules {
    pub max_length: Option<usize>,
    pub fallback: &'static str,
    pub sanitize: fn(&str) -> String,
    pub clean_tail: fn(&str) -> String,
    /// Whether reserved usernames are off limits.
    pub check_reserved: bool,
}

impl NameRules {
    pub const USERNAME: NameRules = NameRules {
        max_length: Some(MAX_USERNAME_LENGTH),
        fallback: "user",
        sanitize: sanitize_username,
        clean_tail: clean_username_tail,
        check_reserved: true,
    };

    pub const GROUP_NAME: NameRules = NameRules {
        max_length: Some(MAX_USERNAME_LENGTH),
        fallback: "group",
        sanitize: sanitize_username,
        clean_tail: clean_username_tail,
        check_reserved: false,
    };

    pub const CATEGORY_NAME: NameRules = NameRules {
        max_length: Some(MAX_CATEGORY_NAME_LENGTH),
        fallback: "Category",
        sanitize: sanitize_display_name,
        clean_tail: clean_display_name_tail,
        check_reserved: false,
    };

    pub const BADGE_NAME: NameRules = NameRules {
        max_length: Some(MAX_BADGE_NAME_LENGTH),
        fallback: "Badge",
        sanitize: sanitize_display_name,
        clean_tail: clean_display_name_tail,
        check_reserved: false,
    };

    /// Sanitized, truncated candidate before any collision handling.
    pub fn normalize(&self, candidate: &str) -> String {
        let mut name = (self.sanitize)(candidate);
        if name.is_empty() {
            name = self.fallback.to_string();
        }

        if let Some(max) = self.max_length {
            if name.chars().count() > max {
                name = (self.clean_tail)(&truncate_chars(&name, max));
                if name.is_empty() {
                    name = self.fallback.to_string();
                }
            }
        }
        name
    }
}

/// Allocates names that do not collide, case-insensitively, with anything
/// already taken in its namespace.
#[derive(Debug, Default)]
pub struct UniqueNameFinder {
    used_lower: HashSet<String>,
    last_suffix: HashMap<String, u64>,
    reserved_lower: HashSet<String>,
}

impl UniqueNameFinder {
    /// Seed from the taken names of every set in the namespace.
    pub fn new<'a, I>(namespace: I) -> Self
    where
        I: IntoIterator<Item = &'a HashSet<String>>,
    {
        let used_lower: HashSet<String> = namespace
            .into_iter()
            .flat_map(|set| set.iter().map(|name| name.to_lowercase()))
            .collect();
        let last_suffix = SuffixFinder::find(used_lower.iter().map(String::as_str));

        Self {
            used_lower,
            last_suffix,
            reserved_lower: HashSet::new(),
        }
    }

    pub fn with_reserved<I, S>(mut self, reserved: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.reserved_lower = reserved
            .into_iter()
            .map(|name| name.as_ref().to_lowercase())
            .collect();
        self
    }

    pub fn is_available(&self, name: &str, rules: &NameRules, allow_reserved: bool) -> bool {
        let lower = name.to_lowercase();
        if self.used_lower.contains(&lower) {
            return false;
        }
        allow_reserved || !rules.check_reserved || !self.reserved_lower.contains(&lower)
    }

    /// Allocate a name for `candidate` and mark it as taken.
    ///
    /// The length limit applies to the base name only; a numeric suffix may
    /// push the result past it.
    pub fn find_available_name(
        &mut self,
        candidate: &str,
        rules: &NameRules,
        allow_reserved: bool,
    ) -> String {
        let base = rules.normalize(candidate);

        let name = if self.is_available(&base, rules, allow_reserved) {
            base
        } else {
            let base_lower = base.to_lowercase();
            let separator = if base.ends_with(|c: char| c.is_ascii_digit()) {
                "_"
            } else {
                ""
            };
            let stem = format!("{}{}", base, separator);

            // a seeded suffix at u64::MAX restarts the scan from 1
            let start = self
                .last_suffix
                .get(&base_lower)
                .and_then(|last| last.checked_add(1))
                .unwrap_or(1);
            let mut name = format!("{}{}", stem, start);
            while !self.is_available(&name, rules, allow_reserved) {
                name = next_name(&name);
            }

            let suffix = name[stem.len()..].parse::<u64>().unwrap_or(start);
            self.last_suffix.insert(base_lower, suffix);
            debug!("Name '{}' is taken, using '{}'", base, name);
            name
        };

        self.used_lower.insert(name.to_lowercase());
        name
    }
}

/// Shared namespace of usernames and group names.
pub struct UserGroupNameFinder {
    inner: UniqueNameFinder,
}

impl UserGroupNameFinder {
    pub async fn load(shared: &SharedData, reserved: &[String]) -> Result<Self> {
        let usernames = shared.load(USERNAMES).await?;
        let group_names = shared.load(GROUP_NAMES).await?;
        Ok(Self {
            inner: UniqueNameFinder::new([usernames.as_ref(), group_names.as_ref()])
                .with_reserved(reserved),
        })
    }

    pub fn find_available_username(&mut self, candidate: &str, allow_reserved: bool) -> String {
        self.inner
            .find_available_name(candidate, &NameRules::USERNAME, allow_reserved)
    }

    pub fn find_available_group_name(&mut self, candidate: &str) -> String {
        self.inner
            .find_available_name(candidate, &NameRules::GROUP_NAME, false)
    }
}

pub struct CategoryNameFinder {
    inner: UniqueNameFinder,
}

impl CategoryNameFinder {
    pub async fn load(shared: &SharedData) -> Result<Self> {
        let names = shared.load(CATEGORY_NAMES).await?;
        Ok(Self {
            inner: UniqueNameFinder::new([names.as_ref()]),
        })
    }

    pub fn find_available_name(&mut self, candidate: &str) -> String {
        self.inner
            .find_available_name(candidate, &NameRules::CATEGORY_NAME, false)
    }
}

pub struct BadgeNameFinder {
    inner: UniqueNameFinder,
}

impl BadgeNameFinder {
    pub async fn load(shared: &SharedData) -> Result<Self> {
        let names = shared.load(BADGE_NAMES).await?;
        Ok(Self {
            inner: UniqueNameFinder::new([names.as_ref()]),
        })
    }

    pub fn find_available_name(&mut self, candidate: &str) -> String {
        self.inner
            .find_available_name(candidate, &NameRules::BADGE_NAME, false)
    }
}
