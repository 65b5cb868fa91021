//! Categories.

use std::collections::HashSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::{unmapped_rows, SYSTEM_USER_ID};
use crate::error::{MigrateError, Result};
use crate::mapping::MappingType;
use crate::names::CategoryNameFinder;
use crate::shared_data::CATEGORY_NAMES;
use crate::staging::SourceQuery;
use crate::step::{RowContext, Step, StepContext, StepDefinition};
use crate::value::{Row, SourceRow};

static NON_SLUG_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));

pub fn definition() -> StepDefinition {
    StepDefinition::new("categories", "categories")
        .depends_on("users")
        .requires_mapping("users", MappingType::Users)
        .requires_set("slugs", "SELECT slug FROM categories")
        .columns(&[
            "id",
            "name",
            "name_lower",
            "slug",
            "description",
            "user_id",
            "position",
            "created_at",
            "updated_at",
        ])
        .store_mapped_ids(MappingType::Categories)
}

#[derive(Default)]
pub struct CategoriesStep {
    names: Option<CategoryNameFinder>,
    slugs: HashSet<String>,
}

#[async_trait]
impl Step for CategoriesStep {
    fn rows_query(&self) -> SourceQuery {
        unmapped_rows("categories", MappingType::Categories)
    }

    async fn setup(&mut self, ctx: &StepContext<'_>) -> Result<()> {
        self.names = Some(CategoryNameFinder::load(ctx.shared).await?);
        Ok(())
    }

    fn transform(&mut self, mut row: SourceRow, ctx: &mut RowContext<'_>) -> Result<Option<Row>> {
        let names = self
            .names
            .as_mut()
            .ok_or_else(|| MigrateError::step("categories", "category name finder not loaded"))?;
        let name = names.find_available_name(row.get_str("name").unwrap_or_default());

        let user_id = match row.original_id("user_id") {
            Some(id) => ctx.required().mapped_id("users", &id)?,
            None => None,
        };
        let user_id = user_id.unwrap_or_else(|| {
            ctx.warn(&format!("category '{}' has no imported owner", name));
            SYSTEM_USER_ID
        });

        let slug = unique_slug(&name, ctx.required().set("slugs")?, &mut self.slugs);

        Ok(Some(
            Row::new()
                .with("name_lower", name.to_lowercase())
                .with("name", name)
                .with("slug", slug)
                .with("description", row.take("description"))
                .with("user_id", user_id)
                .with("position", row.take("position"))
                .with("created_at", row.take("created_at")),
        ))
    }

    async fn finish(&mut self, ctx: &StepContext<'_>) -> Result<()> {
        ctx.shared.unload(CATEGORY_NAMES).await
    }
}

/// Lowercase ASCII slug of `name`, empty when nothing usable remains.
pub fn slugify(name: &str) -> String {
    NON_SLUG_CHARS
        .replace_all(&name.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

/// A slug not present in `existing` nor handed out before.
fn unique_slug(name: &str, existing: &HashSet<String>, taken: &mut HashSet<String>) -> String {
    let mut base = slugify(name);
    if base.is_empty() {
        base = "category".to_string();
    }

    let mut slug = base.clone();
    let mut n = 1;
    while existing.contains(&slug) || taken.contains(&slug) {
        n += 1;
        slug = format!("{}-{}", base, n);
    }
    taken.insert(slug.clone());
    slug
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::memory::MemoryTargetStore;
    use crate::testing::Fixture;
    use crate::value::OriginalId;

    const STAGING: &str = "
        CREATE TABLE categories (
            id INTEGER PRIMARY KEY, name TEXT, description TEXT, user_id INTEGER,
            position INTEGER, created_at TEXT
        );
        INSERT INTO categories VALUES
            (1, 'General  Talk', 'Anything goes', 7, 1, NULL),
            (2, 'general talk', NULL, 8, 2, NULL),
            (3, 'Support', NULL, NULL, NULL, NULL),
            (4, '!!!', NULL, 7, 3, NULL);
    ";

    fn target() -> MemoryTargetStore {
        MemoryTargetStore::new()
            .with_table(
                "categories",
                &[
                    ("id", "int4"),
                    ("name", "varchar"),
                    ("name_lower", "varchar"),
                    ("slug", "varchar"),
                    ("description", "text"),
                    ("user_id", "int4"),
                    ("position", "int4"),
                    ("created_at", "timestamp"),
                    ("updated_at", "timestamp"),
                ],
            )
            .with_existing_max_id("categories", 1)
            .with_set("SELECT LOWER(name) FROM categories", &["uncategorized"])
            .with_set("SELECT slug FROM categories", &["support"])
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("General  Talk"), "general-talk");
        assert_eq!(slugify("  C++ & Rust! "), "c-rust");
        assert_eq!(slugify("Ünïcode"), "n-code");
        assert_eq!(slugify("!!!"), "");
    }

    #[tokio::test]
    async fn test_categories_get_unique_names_and_slugs() {
        let fx = Fixture::new(STAGING, target());
        fx.mappings
            .insert_batch(MappingType::Users, &[(OriginalId::Int(7), 70)])
            .unwrap();

        let summary = fx
            .run_step(&definition(), Box::<CategoriesStep>::default())
            .await
            .unwrap();

        assert_eq!(summary.inserted, 4);
        assert_eq!(summary.warned, 2);
        assert_eq!(fx.target.ids("categories"), vec![2, 3, 4, 5]);
        assert_eq!(
            fx.target.texts("categories", "name"),
            vec![
                Some("General Talk".to_string()),
                Some("general talk1".to_string()),
                Some("Support".to_string()),
                Some("!!!".to_string())
            ]
        );
        assert_eq!(
            fx.target.texts("categories", "slug"),
            vec![
                Some("general-talk".to_string()),
                Some("general-talk1".to_string()),
                Some("support-2".to_string()),
                Some("category".to_string())
            ]
        );
        assert_eq!(
            fx.target.ints("categories", "user_id"),
            vec![Some(70), Some(SYSTEM_USER_ID), Some(SYSTEM_USER_ID), Some(70)]
        );
    }
}
