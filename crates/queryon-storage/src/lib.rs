// Postgres storage layer with sqlx

pub mod models;
pub mod repositories;
pub mod store;

pub use models::*;
pub use repositories::Database;
pub use store::PgConversationStore;

use queryon_core::rules::Rule;

/// Convert a rules row into the engine's runtime representation
pub fn rule_from_row(row: RuleRow) -> Rule {
    let next_steps = row.next_steps.and_then(|v| {
        v.as_object().map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
    });
    Rule {
        id: row.id,
        name: row.name,
        description: row.description,
        trigger_patterns: row.trigger_patterns,
        response_template: row.response_template,
        variables: row.variables.as_object().cloned().unwrap_or_default(),
        priority: row.priority,
        is_active: row.is_active,
        flow_id: row.flow_id,
        step_key: row.step_key,
        required_step: row.required_step,
        next_steps,
    }
}
