//! Health-profile incompatibility warnings.
//!
//! A product is flagged for a user when one of its ingredients is linked to
//! an allergy or illness the user declared.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use ts_rs::TS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum ConditionKind {
    Allergy,
    Illness,
}

/// One declared condition and the ingredients it conflicts with.
#[derive(Debug, Clone)]
pub struct DeclaredCondition {
    pub kind: ConditionKind,
    pub name: String,
    pub ingredient_ids: BTreeSet<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct HealthWarning {
    pub kind: ConditionKind,
    pub condition: String,
    pub ingredients: Vec<String>,
}

/// Warnings for a product, ordered allergies first then by condition name.
pub fn product_warnings(
    product_ingredients: &HashMap<i64, String>,
    conditions: &[DeclaredCondition],
) -> Vec<HealthWarning> {
    let mut warnings: Vec<HealthWarning> = conditions
        .iter()
        .filter_map(|c| {
            let mut hits: Vec<String> = c
                .ingredient_ids
                .iter()
                .filter_map(|id| product_ingredients.get(id).cloned())
                .collect();
            if hits.is_empty() {
                return None;
            }
            hits.sort();
            Some(HealthWarning {
                kind: c.kind,
                condition: c.name.clone(),
                ingredients: hits,
            })
        })
        .collect();

    warnings.sort_by(|a, b| {
        let rank = |k: ConditionKind| matches!(k, ConditionKind::Illness) as u8;
        rank(a.kind)
            .cmp(&rank(b.kind))
            .then_with(|| a.condition.cmp(&b.condition))
    });
    warnings
}
