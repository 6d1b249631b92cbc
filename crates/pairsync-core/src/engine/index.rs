//! Pass-local lookup over the pairing snapshot

use std::collections::{HashMap, HashSet};

use crate::engine::report::Side;
use crate::error::{Error, Result};
use crate::traits::Pairing;

/// The id a pairing holds for `side`
pub(crate) fn id_on(pairing: &Pairing, side: Side) -> &str {
    match side {
        Side::Primary => &pairing.id_in_primary,
        Side::Secondary => &pairing.id_in_secondary,
    }
}

/// Pairings of one service, indexed by both record ids
///
/// Built once per pass from the snapshot. Rows deleted during the pass are
/// marked rather than dropped so later phases can tell "never paired" from
/// "unpaired a moment ago".
#[derive(Debug)]
pub(crate) struct PairingIndex {
    rows: Vec<Pairing>,
    by_primary: HashMap<String, usize>,
    by_secondary: HashMap<String, usize>,
    removed: HashSet<String>,
}

impl PairingIndex {
    /// Index a snapshot, rejecting any id paired twice
    pub(crate) fn build(service_name: &str, rows: Vec<Pairing>) -> Result<Self> {
        let mut by_primary: HashMap<String, usize> = HashMap::with_capacity(rows.len());
        let mut by_secondary: HashMap<String, usize> = HashMap::with_capacity(rows.len());

        for (pos, row) in rows.iter().enumerate() {
            if row.service_name != service_name {
                return Err(Error::invariant(format!(
                    "pairing '{}' belongs to service '{}', listed under '{}'",
                    row.id, row.service_name, service_name
                )));
            }
            if let Some(&other) = by_primary.get(&row.id_in_primary) {
                return Err(Error::invariant(format!(
                    "primary id '{}' is paired by both '{}' and '{}'",
                    row.id_in_primary, rows[other].id, row.id
                )));
            }
            if let Some(&other) = by_secondary.get(&row.id_in_secondary) {
                return Err(Error::invariant(format!(
                    "secondary id '{}' is paired by both '{}' and '{}'",
                    row.id_in_secondary, rows[other].id, row.id
                )));
            }
            by_primary.insert(row.id_in_primary.clone(), pos);
            by_secondary.insert(row.id_in_secondary.clone(), pos);
        }

        Ok(Self {
            rows,
            by_primary,
            by_secondary,
            removed: HashSet::new(),
        })
    }

    /// The pairing holding `record_id` on `side`, removed or not
    pub(crate) fn lookup(&self, side: Side, record_id: &str) -> Option<&Pairing> {
        let pos = match side {
            Side::Primary => self.by_primary.get(record_id),
            Side::Secondary => self.by_secondary.get(record_id),
        }?;
        Some(&self.rows[*pos])
    }

    /// The live pairing linking exactly these two ids
    pub(crate) fn find_link(&self, id_in_primary: &str, id_in_secondary: &str) -> Option<&Pairing> {
        self.lookup(Side::Primary, id_in_primary)
            .filter(|row| row.links(id_in_primary, id_in_secondary))
            .filter(|row| !self.is_removed(&row.id))
    }

    /// Record that a row was deleted during this pass
    pub(crate) fn mark_removed(&mut self, pairing_id: &str) {
        self.removed.insert(pairing_id.to_string());
    }

    pub(crate) fn is_removed(&self, pairing_id: &str) -> bool {
        self.removed.contains(pairing_id)
    }

    /// Every row of the snapshot
    pub(crate) fn rows(&self) -> &[Pairing] {
        &self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, p: &str, s: &str) -> Pairing {
        Pairing {
            id: id.into(),
            service_name: "hubspot/deals".into(),
            id_in_primary: p.into(),
            id_in_secondary: s.into(),
            updated_at: 0,
        }
    }

    #[test]
    fn test_lookup_both_directions() {
        let index = PairingIndex::build(
            "hubspot/deals",
            vec![row("r1", "p1", "s1"), row("r2", "p2", "s2")],
        )
        .unwrap();

        assert_eq!(index.lookup(Side::Primary, "p2").unwrap().id, "r2");
        assert_eq!(index.lookup(Side::Secondary, "s1").unwrap().id, "r1");
        assert!(index.lookup(Side::Primary, "s1").is_none());
        assert_eq!(id_on(index.lookup(Side::Primary, "p1").unwrap(), Side::Secondary), "s1");
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let dup_primary = PairingIndex::build(
            "hubspot/deals",
            vec![row("r1", "p1", "s1"), row("r2", "p1", "s2")],
        );
        assert!(matches!(dup_primary, Err(Error::InvariantViolation(_))));

        let dup_secondary = PairingIndex::build(
            "hubspot/deals",
            vec![row("r1", "p1", "s1"), row("r2", "p2", "s1")],
        );
        assert!(matches!(dup_secondary, Err(Error::InvariantViolation(_))));
    }

    #[test]
    fn test_removed_rows_do_not_link() {
        let mut index = PairingIndex::build("hubspot/deals", vec![row("r1", "p1", "s1")]).unwrap();
        assert!(index.find_link("p1", "s1").is_some());
        assert!(index.find_link("p1", "s2").is_none());

        index.mark_removed("r1");
        assert!(index.find_link("p1", "s1").is_none());
        assert!(index.lookup(Side::Primary, "p1").is_some());
    }
}
