//! Step registration and dependency ordering.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use tracing::debug;

use super::definition::StepDefinition;
use super::Step;
use crate::error::{MigrateError, Result};

/// Creates a fresh step instance for one run.
pub type StepFactory = Arc<dyn Fn() -> Box<dyn Step> + Send + Sync>;

struct Registration {
    definition: StepDefinition,
    factory: StepFactory,
}

/// Known steps, keyed by name.
#[derive(Default)]
pub struct StepRegistry {
    steps: BTreeMap<String, Registration>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step. A later registration under the same name replaces it.
    pub fn register<F>(&mut self, definition: StepDefinition, factory: F)
    where
        F: Fn() -> Box<dyn Step> + Send + Sync + 'static,
    {
        self.steps.insert(
            definition.name().to_string(),
            Registration {
                definition,
                factory: Arc::new(factory),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn definition(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.get(name).map(|r| &r.definition)
    }

    pub fn instantiate(&self, name: &str) -> Result<Box<dyn Step>> {
        self.steps
            .get(name)
            .map(|r| (r.factory)())
            .ok_or_else(|| MigrateError::UnknownStep(name.to_string()))
    }

    /// Dependency-ordered steps after applying `skip` / `only`.
    pub fn sorted(&self, skip: &[String], only: &[String]) -> Result<Vec<&StepDefinition>> {
        for registration in self.steps.values() {
            for dependency in registration.definition.dependencies() {
                if !self.steps.contains_key(dependency) {
                    return Err(MigrateError::UnknownStep(format!(
                        "{} (dependency of {})",
                        dependency,
                        registration.definition.name()
                    )));
                }
            }
        }
        for name in skip.iter().chain(only) {
            if !self.steps.contains_key(name) {
                return Err(MigrateError::UnknownStep(name.clone()));
            }
        }

        let selected = self.select(skip, only);
        let definitions: Vec<&StepDefinition> = selected
            .iter()
            .filter_map(|name| self.definition(name))
            .collect();
        TopologicalSorter::sort(&definitions)
    }

    fn select(&self, skip: &[String], only: &[String]) -> BTreeSet<String> {
        if !only.is_empty() {
            let mut selected = BTreeSet::new();
            let mut pending: Vec<&str> = only.iter().map(String::as_str).collect();
            while let Some(name) = pending.pop() {
                if !selected.insert(name.to_string()) {
                    continue;
                }
                if let Some(def) = self.definition(name) {
                    pending.extend(def.dependencies().iter().map(String::as_str));
                }
            }
            return selected;
        }

        self.steps
            .keys()
            .filter(|name| !skip.contains(*name))
            .cloned()
            .collect()
    }
}

/// Kahn's algorithm over step definitions.
pub struct TopologicalSorter;

impl TopologicalSorter {
    /// Order `definitions` so that each step follows its dependencies.
    ///
    /// Dependencies outside the given set count as satisfied. Ties are broken
    /// by step name, so the result is stable for a given input.
    pub fn sort<'a>(definitions: &[&'a StepDefinition]) -> Result<Vec<&'a StepDefinition>> {
        let mut nodes: Vec<&'a StepDefinition> = definitions.to_vec();
        nodes.sort_by(|a, b| a.name().cmp(b.name()));
        nodes.dedup_by(|a, b| a.name() == b.name());

        let index: HashMap<&str, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, def)| (def.name(), i))
            .collect();

        let mut in_degree = vec![0usize; nodes.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        for (i, def) in nodes.iter().enumerate() {
            for dependency in def.dependencies() {
                if let Some(&d) = index.get(dependency.as_str()) {
                    dependents[d].push(i);
                    in_degree[i] += 1;
                }
            }
        }

        let mut queue: VecDeque<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut ordered = Vec::with_capacity(nodes.len());
        while let Some(i) = queue.pop_front() {
            ordered.push(nodes[i]);
            for &dependent in &dependents[i] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if ordered.len() < nodes.len() {
            let remaining: Vec<String> = nodes
                .iter()
                .enumerate()
                .filter(|(i, _)| in_degree[*i] > 0)
                .map(|(_, def)| def.name().to_string())
                .collect();
            return Err(MigrateError::CircularDependency(remaining));
        }

        debug!(
            "Step order: {}",
            ordered
                .iter()
                .map(|d| d.name())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(ordered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::SourceQuery;
    use crate::step::RowContext;
    use crate::value::{Row, SourceRow};

    struct NoopStep;

    #[async_trait::async_trait]
    impl Step for NoopStep {
        fn rows_query(&self) -> SourceQuery {
            SourceQuery::new("SELECT 1")
        }

        fn transform(&mut self, _row: SourceRow, _ctx: &mut RowContext<'_>) -> Result<Option<Row>> {
            Ok(None)
        }
    }

    fn registry(edges: &[(&str, &[&str])]) -> StepRegistry {
        let mut registry = StepRegistry::new();
        for (name, deps) in edges {
            let mut def = StepDefinition::new(name, name);
            for dep in deps.iter() {
                def = def.depends_on(dep);
            }
            registry.register(def, || Box::new(NoopStep));
        }
        registry
    }

    fn names(steps: &[&StepDefinition]) -> Vec<String> {
        steps.iter().map(|d| d.name().to_string()).collect()
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_dependencies_precede_dependents() {
        let registry = registry(&[
            ("user_badges", &["users", "badges"]),
            ("badges", &[]),
            ("users", &[]),
            ("groups", &["users"]),
            ("group_users", &["groups", "users"]),
        ]);
        let order = names(&registry.sorted(&[], &[]).unwrap());

        assert_eq!(order.len(), 5);
        for (name, deps) in [
            ("user_badges", vec!["users", "badges"]),
            ("groups", vec!["users"]),
            ("group_users", vec!["groups", "users"]),
        ] {
            for dep in deps {
                assert!(position(&order, dep) < position(&order, name), "{} before {}", dep, name);
            }
        }
    }

    #[test]
    fn test_order_is_deterministic() {
        let edges: &[(&str, &[&str])] = &[
            ("c", &[]),
            ("a", &[]),
            ("b", &["a"]),
            ("d", &["c"]),
        ];
        let first = names(&registry(edges).sorted(&[], &[]).unwrap());
        for _ in 0..10 {
            assert_eq!(names(&registry(edges).sorted(&[], &[]).unwrap()), first);
        }
        assert_eq!(first, vec!["a", "c", "b", "d"]);
    }

    #[test]
    fn test_cycle_is_fatal() {
        let registry = registry(&[("a", &["c"]), ("b", &["a"]), ("c", &["b"]), ("x", &[])]);
        match registry.sorted(&[], &[]) {
            Err(MigrateError::CircularDependency(remaining)) => {
                assert_eq!(remaining, vec!["a", "b", "c"]);
            }
            other => panic!("expected cycle error, got {:?}", other.map(|s| names(&s))),
        }
    }

    #[test]
    fn test_only_includes_transitive_dependencies() {
        let registry = registry(&[
            ("users", &[]),
            ("groups", &["users"]),
            ("group_users", &["groups"]),
            ("badges", &[]),
        ]);
        let order = names(&registry.sorted(&[], &["group_users".to_string()]).unwrap());
        assert_eq!(order, vec!["users", "groups", "group_users"]);
    }

    #[test]
    fn test_skip_treats_skipped_dependencies_as_satisfied() {
        let registry = registry(&[("users", &[]), ("groups", &["users"]), ("badges", &[])]);
        let order = names(&registry.sorted(&["users".to_string()], &[]).unwrap());
        assert_eq!(order, vec!["badges", "groups"]);
    }

    #[test]
    fn test_unknown_names_are_rejected() {
        let registry = registry(&[("users", &[])]);
        assert!(matches!(
            registry.sorted(&["nope".to_string()], &[]),
            Err(MigrateError::UnknownStep(_))
        ));

        let broken = registry_with_missing_dependency();
        assert!(matches!(broken.sorted(&[], &[]), Err(MigrateError::UnknownStep(_))));
    }

    fn registry_with_missing_dependency() -> StepRegistry {
        registry(&[("groups", &["users"])])
    }

    #[test]
    fn test_instantiate() {
        let registry = registry(&[("users", &[])]);
        assert!(registry.instantiate("users").is_ok());
        assert!(matches!(
            registry.instantiate("ghost"),
            Err(MigrateError::UnknownStep(_))
        ));
    }
}
