//! Dependency ordering of tables by foreign key.

use std::collections::{HashMap, HashSet};

use tracing::warn;

/// Order tables so referenced tables come before the tables referencing them.
///
/// `tables` is in declaration order and `references` maps a table to the
/// tables its foreign keys point at. Among the tables that are ready, the
/// earliest declared goes first. When only cycles remain, the earliest
/// declared remaining table is taken as if its references were satisfied.
/// Self references and references to unknown tables are ignored. Table names
/// compare case-insensitively.
pub fn dependency_order(tables: &[String], references: &HashMap<String, Vec<String>>) -> Vec<String> {
    let known: HashSet<String> = tables.iter().map(|t| t.to_lowercase()).collect();
    let deps: Vec<HashSet<String>> = tables
        .iter()
        .map(|t| {
            let own = t.to_lowercase();
            references
                .get(t)
                .into_iter()
                .flatten()
                .map(|r| r.to_lowercase())
                .filter(|r| *r != own && known.contains(r))
                .collect()
        })
        .collect();

    let mut placed: HashSet<String> = HashSet::with_capacity(tables.len());
    let mut remaining: Vec<usize> = (0..tables.len()).collect();
    let mut ordered = Vec::with_capacity(tables.len());

    while !remaining.is_empty() {
        let ready = remaining
            .iter()
            .position(|&i| deps[i].iter().all(|d| placed.contains(d)));
        let pos = match ready {
            Some(pos) => pos,
            None => {
                let stuck = &tables[remaining[0]];
                warn!(
                    "Foreign key cycle involving {}; migrating it before the tables it references",
                    stuck
                );
                0
            }
        };
        let idx = remaining.remove(pos);
        placed.insert(tables[idx].to_lowercase());
        ordered.push(tables[idx].clone());
    }

    ordered
}
