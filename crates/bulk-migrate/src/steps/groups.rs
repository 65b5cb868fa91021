//! Groups and group memberships.

use std::collections::HashSet;

use async_trait::async_trait;

use super::{flag, pair_key, unmapped_rows};
use crate::error::{MigrateError, Result};
use crate::mapping::MappingType;
use crate::names::UserGroupNameFinder;
use crate::shared_data::GROUP_NAMES;
use crate::staging::SourceQuery;
use crate::step::{RowContext, Step, StepContext, StepDefinition};
use crate::value::{Row, SourceRow};

/// Visible to everyone.
const PUBLIC_VISIBILITY: i64 = 0;
/// Default notification level of a membership ("tracking").
const NOTIFICATION_LEVEL: i64 = 2;

const EXISTING_MEMBERSHIPS: &str =
    "SELECT group_id::text || ':' || user_id::text FROM group_users";

pub fn groups_definition() -> StepDefinition {
    // usernames and group names share one namespace
    StepDefinition::new("groups", "groups")
        .depends_on("users")
        .columns(&[
            "id",
            "name",
            "full_name",
            "bio_raw",
            "visibility_level",
            "created_at",
            "updated_at",
        ])
        .store_mapped_ids(MappingType::Groups)
}

pub fn group_users_definition() -> StepDefinition {
    StepDefinition::new("group_users", "group_users")
        .title("Importing group memberships")
        .depends_on("groups")
        .depends_on("users")
        .requires_mapping("groups", MappingType::Groups)
        .requires_mapping("users", MappingType::Users)
        .requires_set("memberships", EXISTING_MEMBERSHIPS)
        .columns(&[
            "group_id",
            "user_id",
            "owner",
            "notification_level",
            "created_at",
            "updated_at",
        ])
}

#[derive(Default)]
pub struct GroupsStep {
    names: Option<UserGroupNameFinder>,
}

#[async_trait]
impl Step for GroupsStep {
    fn rows_query(&self) -> SourceQuery {
        unmapped_rows("groups", MappingType::Groups)
    }

    async fn setup(&mut self, ctx: &StepContext<'_>) -> Result<()> {
        let finder = UserGroupNameFinder::load(ctx.shared, &ctx.config.reserved_usernames).await?;
        self.names = Some(finder);
        Ok(())
    }

    fn transform(&mut self, mut row: SourceRow, _ctx: &mut RowContext<'_>) -> Result<Option<Row>> {
        let names = self
            .names
            .as_mut()
            .ok_or_else(|| MigrateError::step("groups", "group name finder not loaded"))?;

        let candidate = row.get_str("name").unwrap_or_default().to_string();
        let name = names.find_available_group_name(&candidate);
        let full_name = match row.take("full_name") {
            v if v.is_null() => candidate.into(),
            v => v,
        };

        Ok(Some(
            Row::new()
                .with("name", name)
                .with("full_name", full_name)
                .with("bio_raw", row.take("bio"))
                .with("visibility_level", PUBLIC_VISIBILITY)
                .with("created_at", row.take("created_at")),
        ))
    }

    async fn finish(&mut self, ctx: &StepContext<'_>) -> Result<()> {
        ctx.shared.unload(GROUP_NAMES).await
    }
}

/// Memberships whose group and user were both imported. Memberships that
/// already exist in the target are skipped.
#[derive(Default)]
pub struct GroupUsersStep {
    seen: HashSet<(i64, i64)>,
}

#[async_trait]
impl Step for GroupUsersStep {
    fn rows_query(&self) -> SourceQuery {
        SourceQuery::new("SELECT * FROM group_users")
    }

    fn transform(&mut self, row: SourceRow, ctx: &mut RowContext<'_>) -> Result<Option<Row>> {
        let group_id = match row.original_id("group_id") {
            Some(id) => ctx.required().mapped_id("groups", &id)?,
            None => None,
        };
        let user_id = match row.original_id("user_id") {
            Some(id) => ctx.required().mapped_id("users", &id)?,
            None => None,
        };
        let (Some(group_id), Some(user_id)) = (group_id, user_id) else {
            ctx.skip("group or user was not imported");
            return Ok(None);
        };

        if ctx
            .required()
            .set_contains("memberships", &pair_key(group_id, user_id))?
            || !self.seen.insert((group_id, user_id))
        {
            ctx.skip("membership exists");
            return Ok(None);
        }

        Ok(Some(
            Row::new()
                .with("group_id", group_id)
                .with("user_id", user_id)
                .with("owner", flag(&row, "owner"))
                .with("notification_level", NOTIFICATION_LEVEL),
        ))
    }
}
