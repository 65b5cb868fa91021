//! Users and their email addresses.

use async_trait::async_trait;

use super::{flag, unmapped_rows};
use crate::error::{MigrateError, Result};
use crate::mapping::MappingType;
use crate::names::UserGroupNameFinder;
use crate::shared_data::USERNAMES;
use crate::staging::SourceQuery;
use crate::step::{RowContext, Step, StepContext, StepDefinition};
use crate::value::{Row, SourceRow};

const DEFAULT_TRUST_LEVEL: i64 = 1;

pub fn users_definition() -> StepDefinition {
    StepDefinition::new("users", "users")
        .columns(&[
            "id",
            "username",
            "username_lower",
            "name",
            "admin",
            "moderator",
            "trust_level",
            "active",
            "approved",
            "created_at",
            "updated_at",
        ])
        .store_mapped_ids(MappingType::Users)
}

pub fn user_emails_definition() -> StepDefinition {
    StepDefinition::new("user_emails", "user_emails")
        .depends_on("users")
        .requires_mapping("users", MappingType::Users)
        .columns(&[
            "id",
            "user_id",
            "email",
            "primary",
            "created_at",
            "updated_at",
        ])
        .store_mapped_ids(MappingType::UserEmails)
}

/// Creates users with unique usernames.
#[derive(Default)]
pub struct UsersStep {
    usernames: Option<UserGroupNameFinder>,
}

#[async_trait]
impl Step for UsersStep {
    fn rows_query(&self) -> SourceQuery {
        unmapped_rows("users", MappingType::Users)
    }

    async fn setup(&mut self, ctx: &StepContext<'_>) -> Result<()> {
        let finder = UserGroupNameFinder::load(ctx.shared, &ctx.config.reserved_usernames).await?;
        self.usernames = Some(finder);
        Ok(())
    }

    fn transform(&mut self, mut row: SourceRow, _ctx: &mut RowContext<'_>) -> Result<Option<Row>> {
        let usernames = self
            .usernames
            .as_mut()
            .ok_or_else(|| MigrateError::step("users", "username finder not loaded"))?;

        let candidate = row
            .get_str("username")
            .or_else(|| row.get_str("name"))
            .or_else(|| row.get_str("email").and_then(|e| e.split('@').next()))
            .unwrap_or_default()
            .to_string();
        let admin = flag(&row, "admin");
        let username = usernames.find_available_username(&candidate, admin);

        Ok(Some(
            Row::new()
                .with("username_lower", username.to_lowercase())
                .with("username", username)
                .with("name", row.take("name"))
                .with("admin", admin)
                .with("moderator", flag(&row, "moderator"))
                .with(
                    "trust_level",
                    row.get_i64("trust_level").unwrap_or(DEFAULT_TRUST_LEVEL),
                )
                .with("active", true)
                .with("approved", true)
                .with("created_at", row.take("created_at")),
        ))
    }

    async fn finish(&mut self, ctx: &StepContext<'_>) -> Result<()> {
        // later steps must see the usernames taken here
        ctx.shared.unload(USERNAMES).await
    }
}

/// Email addresses of imported users.
pub struct UserEmailsStep;

#[async_trait]
impl Step for UserEmailsStep {
    fn rows_query(&self) -> SourceQuery {
        unmapped_rows("user_emails", MappingType::UserEmails)
    }

    fn transform(&mut self, row: SourceRow, ctx: &mut RowContext<'_>) -> Result<Option<Row>> {
        let Some(user_id) = row.original_id("user_id") else {
            ctx.skip("missing user_id");
            return Ok(None);
        };
        let Some(user_id) = ctx.required().mapped_id("users", &user_id)? else {
            ctx.skip("user was not imported");
            return Ok(None);
        };
        let Some(email) = row.get_str("email").map(str::trim).filter(|e| !e.is_empty()) else {
            ctx.skip("missing email");
            return Ok(None);
        };
        if !email.contains('@') {
            ctx.warn(&format!("suspicious email address '{}'", email));
        }

        Ok(Some(
            Row::new()
                .with("user_id", user_id)
                .with("email", email.to_lowercase())
                .with("primary", row.get("primary").is_null() || flag(&row, "primary"))
                .with("created_at", row.get("created_at").clone()),
        ))
    }
}
