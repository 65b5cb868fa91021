//! Unique name allocation for usernames, group, category and badge names.

pub mod finder;
pub mod sanitize;
pub mod suffix;

pub use finder::{
    BadgeNameFinder, CategoryNameFinder, NameRules, UniqueNameFinder, UserGroupNameFinder,
};
pub use suffix::SuffixFinder;
