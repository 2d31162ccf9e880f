//! Quota allocation
//!
//! Pure functions splitting a global generation target across the catalog
//! by weight. Never persisted: remaining quota is recomputed each run from
//! the catalog plus the produced counts in the run state.

use crate::catalog::{Catalog, ToolSpec};
use std::collections::BTreeMap;

/// Splits `total` across the catalog proportionally to weight.
///
/// Quotas always sum to exactly `total`. The integer remainder after the
/// floor division goes to the highest-weight tools first, ties broken by
/// catalog order. When `total` covers the catalog, every tool with a
/// positive weight is guaranteed a quota of at least 1, rebalanced from
/// the largest quotas.
pub fn allocate(catalog: &Catalog, total: u64) -> BTreeMap<String, u64> {
    let weight_sum: u64 = catalog.iter().map(|t| u64::from(t.weight)).sum();
    let mut quotas: BTreeMap<String, u64> = catalog.iter().map(|t| (t.id.clone(), 0)).collect();
    if weight_sum == 0 || total == 0 {
        return quotas;
    }

    for tool in catalog.iter() {
        let share = total * u64::from(tool.weight) / weight_sum;
        quotas.insert(tool.id.clone(), share);
    }

    // Remainder to the heaviest tools first, catalog order on ties.
    let mut by_weight: Vec<&ToolSpec> = catalog.iter().filter(|t| t.weight > 0).collect();
    by_weight.sort_by(|a, b| {
        b.weight
            .cmp(&a.weight)
            .then_with(|| catalog.index_of(&a.id).cmp(&catalog.index_of(&b.id)))
    });

    let assigned: u64 = quotas.values().sum();
    let mut remainder = total - assigned;
    for tool in by_weight.iter().cycle() {
        if remainder == 0 {
            break;
        }
        *quotas.get_mut(&tool.id).expect("tool in quota map") += 1;
        remainder -= 1;
    }

    // Floor division can starve light tools; when the target covers the
    // catalog, promote each starved tool by taking from the current max.
    if total >= catalog.len() as u64 {
        for tool in catalog.iter().filter(|t| t.weight > 0) {
            if quotas[&tool.id] > 0 {
                continue;
            }
            let donor = catalog
                .iter()
                .filter(|t| quotas[&t.id] >= 2)
                .max_by(|a, b| {
                    quotas[&a.id]
                        .cmp(&quotas[&b.id])
                        .then_with(|| catalog.index_of(&b.id).cmp(&catalog.index_of(&a.id)))
                })
                .map(|t| t.id.clone());
            if let Some(donor) = donor {
                *quotas.get_mut(&donor).expect("donor in quota map") -= 1;
                *quotas.get_mut(&tool.id).expect("tool in quota map") += 1;
            }
        }
    }

    quotas
}

/// Remaining quota per tool: `target - produced`, saturating at zero.
pub fn remaining(
    catalog: &Catalog,
    total: u64,
    produced: &BTreeMap<String, u64>,
) -> BTreeMap<String, u64> {
    allocate(catalog, total)
        .into_iter()
        .map(|(id, target)| {
            let done = produced.get(&id).copied().unwrap_or(0);
            (id, target.saturating_sub(done))
        })
        .collect()
}

/// The tool with the largest remaining quota, catalog order on ties.
/// `None` once every quota is met.
pub fn next_tool<'a>(
    catalog: &'a Catalog,
    remaining: &BTreeMap<String, u64>,
) -> Option<&'a ToolSpec> {
    catalog
        .iter()
        .filter(|t| remaining.get(&t.id).copied().unwrap_or(0) > 0)
        .max_by(|a, b| {
            let ra = remaining.get(&a.id).copied().unwrap_or(0);
            let rb = remaining.get(&b.id).copied().unwrap_or(0);
            ra.cmp(&rb)
                .then_with(|| catalog.index_of(&b.id).cmp(&catalog.index_of(&a.id)))
        })
}
