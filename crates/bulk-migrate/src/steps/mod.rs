//! Built-in import steps.
//!
//! Each step reads the staging table of the same name and skips rows whose
//! id is already present in the mapping store, so an interrupted import can
//! simply be started again.

pub mod badges;
pub mod categories;
pub mod groups;
pub mod users;

use crate::mapping::MappingType;
use crate::staging::{SourceQuery, MAPPINGS_SCHEMA};
use crate::step::StepRegistry;
use crate::value::{SourceRow, Value};

/// Target id of the system user, used as the owner of imported records
/// whose author is unknown.
pub const SYSTEM_USER_ID: i64 = -1;

/// Registry holding every built-in step.
pub fn builtin_registry() -> StepRegistry {
    let mut registry = StepRegistry::new();
    registry.register(users::users_definition(), || Box::<users::UsersStep>::default());
    registry.register(users::user_emails_definition(), || {
        Box::new(users::UserEmailsStep)
    });
    registry.register(groups::groups_definition(), || Box::<groups::GroupsStep>::default());
    registry.register(groups::group_users_definition(), || {
        Box::<groups::GroupUsersStep>::default()
    });
    registry.register(categories::definition(), || {
        Box::<categories::CategoriesStep>::default()
    });
    registry.register(badges::badges_definition(), || Box::<badges::BadgesStep>::default());
    registry.register(badges::user_badges_definition(), || {
        Box::<badges::UserBadgesStep>::default()
    });
    registry
}

/// All rows of `table` that have no `mapping_type` mapping yet.
fn unmapped_rows(table: &str, mapping_type: MappingType) -> SourceQuery {
    SourceQuery::new(format!(
        "SELECT * FROM {table} WHERE id NOT IN \
         (SELECT original_id FROM {MAPPINGS_SCHEMA}.ids WHERE type = ?1) ORDER BY id"
    ))
    .bind(mapping_type.code())
}

/// SQLite stores booleans as integers.
fn flag(row: &SourceRow, column: &str) -> bool {
    match row.get(column) {
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Text(s) => matches!(s.as_str(), "1" | "t" | "true"),
        _ => false,
    }
}

/// Key of a `(left, right)` pair as stored in a required set.
fn pair_key(left: i64, right: i64) -> String {
    format!("{}:{}", left, right)
}
