//! Badges and badge grants.

use std::collections::HashSet;

use async_trait::async_trait;

use super::{pair_key, unmapped_rows, SYSTEM_USER_ID};
use crate::error::{MigrateError, Result};
use crate::mapping::MappingType;
use crate::names::BadgeNameFinder;
use crate::shared_data::BADGE_NAMES;
use crate::staging::SourceQuery;
use crate::step::{RowContext, Step, StepContext, StepDefinition};
use crate::value::{Row, SourceRow, Value};

/// Bronze.
const DEFAULT_BADGE_TYPE: i64 = 3;

const EXISTING_GRANTS: &str =
    "SELECT badge_id::text || ':' || user_id::text FROM user_badges";

pub fn badges_definition() -> StepDefinition {
    StepDefinition::new("badges", "badges")
        .columns(&[
            "id",
            "name",
            "description",
            "badge_type_id",
            "enabled",
            "created_at",
            "updated_at",
        ])
        .store_mapped_ids(MappingType::Badges)
}

pub fn user_badges_definition() -> StepDefinition {
    StepDefinition::new("user_badges", "user_badges")
        .title("Importing badge grants")
        .depends_on("users")
        .depends_on("badges")
        .requires_mapping("users", MappingType::Users)
        .requires_mapping("badges", MappingType::Badges)
        .requires_set("grants", EXISTING_GRANTS)
        .columns(&["badge_id", "user_id", "granted_at", "granted_by_id", "created_at"])
}

#[derive(Default)]
pub struct BadgesStep {
    names: Option<BadgeNameFinder>,
}

#[async_trait]
impl Step for BadgesStep {
    fn rows_query(&self) -> SourceQuery {
        unmapped_rows("badges", MappingType::Badges)
    }

    async fn setup(&mut self, ctx: &StepContext<'_>) -> Result<()> {
        self.names = Some(BadgeNameFinder::load(ctx.shared).await?);
        Ok(())
    }

    fn transform(&mut self, mut row: SourceRow, _ctx: &mut RowContext<'_>) -> Result<Option<Row>> {
        let names = self
            .names
            .as_mut()
            .ok_or_else(|| MigrateError::step("badges", "badge name finder not loaded"))?;
        let name = names.find_available_name(row.get_str("name").unwrap_or_default());

        Ok(Some(
            Row::new()
                .with("name", name)
                .with("description", row.take("description"))
                .with(
                    "badge_type_id",
                    row.get_i64("badge_type_id").unwrap_or(DEFAULT_BADGE_TYPE),
                )
                .with("enabled", true)
                .with("created_at", row.take("created_at")),
        ))
    }

    async fn finish(&mut self, ctx: &StepContext<'_>) -> Result<()> {
        ctx.shared.unload(BADGE_NAMES).await
    }
}

#[derive(Default)]
pub struct UserBadgesStep {
    seen: HashSet<(i64, i64)>,
}

#[async_trait]
impl Step for UserBadgesStep {
    fn rows_query(&self) -> SourceQuery {
        SourceQuery::new("SELECT * FROM user_badges")
    }

    fn transform(&mut self, mut row: SourceRow, ctx: &mut RowContext<'_>) -> Result<Option<Row>> {
        let badge_id = match row.original_id("badge_id") {
            Some(id) => ctx.required().mapped_id("badges", &id)?,
            None => None,
        };
        let user_id = match row.original_id("user_id") {
            Some(id) => ctx.required().mapped_id("users", &id)?,
            None => None,
        };
        let (Some(badge_id), Some(user_id)) = (badge_id, user_id) else {
            ctx.skip("badge or user was not imported");
            return Ok(None);
        };

        if ctx
            .required()
            .set_contains("grants", &pair_key(badge_id, user_id))?
            || !self.seen.insert((badge_id, user_id))
        {
            ctx.skip("badge already granted");
            return Ok(None);
        }

        let granted_at = match row.take("granted_at") {
            Value::Null => Value::Now,
            v => v,
        };
        Ok(Some(
            Row::new()
                .with("badge_id", badge_id)
                .with("user_id", user_id)
                .with("created_at", granted_at.clone())
                .with("granted_at", granted_at)
                .with("granted_by_id", SYSTEM_USER_ID),
        ))
    }
}
