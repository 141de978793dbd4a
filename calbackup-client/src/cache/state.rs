use chrono::NaiveDate;
use std::collections::BTreeSet;

/// Dates the client believes have a backup.
///
/// `authoritative` is the last inventory fetched from the server (or the
/// persisted copy of it until a fetch succeeds). `optimistic` holds dates
/// recorded locally after a successful backup call and not yet confirmed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownBackups {
    pub optimistic: BTreeSet<NaiveDate>,
    pub authoritative: BTreeSet<NaiveDate>,
}

impl KnownBackups {
    pub fn from_persisted(dates: BTreeSet<NaiveDate>) -> Self {
        Self {
            optimistic: BTreeSet::new(),
            authoritative: dates,
        }
    }

    pub fn record_optimistic(&mut self, date: NaiveDate) {
        self.optimistic.insert(date);
    }

    /// Server state wins: the fetched set replaces everything known so far.
    pub fn apply_authoritative(&mut self, dates: BTreeSet<NaiveDate>) {
        self.authoritative = dates;
        self.optimistic.clear();
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.optimistic.contains(&date) || self.authoritative.contains(&date)
    }

    pub fn dates(&self) -> BTreeSet<NaiveDate> {
        union(&self.optimistic, &self.authoritative)
    }
}

pub fn union(optimistic: &BTreeSet<NaiveDate>, authoritative: &BTreeSet<NaiveDate>) -> BTreeSet<NaiveDate> {
    optimistic.union(authoritative).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::date;

    fn set(dates: &[&str]) -> BTreeSet<NaiveDate> {
        dates.iter().map(|d| date(d)).collect()
    }

    #[test]
    fn test_union_of_both_sets() {
        let mut known = KnownBackups::from_persisted(set(&["2024-03-01"]));
        known.record_optimistic(date("2024-03-05"));

        assert!(known.contains(date("2024-03-01")));
        assert!(known.contains(date("2024-03-05")));
        assert!(!known.contains(date("2024-03-02")));
        assert_eq!(known.dates(), set(&["2024-03-01", "2024-03-05"]));
    }

    #[test]
    fn test_authoritative_overrides_stale_entries() {
        let mut known = KnownBackups::from_persisted(set(&["2024-03-01", "2024-03-02"]));
        known.record_optimistic(date("2024-03-05"));

        known.apply_authoritative(set(&["2024-03-02", "2024-03-09"]));

        assert_eq!(known.dates(), set(&["2024-03-02", "2024-03-09"]));
        assert!(!known.contains(date("2024-03-01")));
        assert!(!known.contains(date("2024-03-05")));
        assert!(known.optimistic.is_empty());
    }

    #[test]
    fn test_union_is_pure() {
        let a = set(&["2024-01-01"]);
        let b = set(&["2024-01-02"]);
        assert_eq!(union(&a, &b), set(&["2024-01-01", "2024-01-02"]));
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }
}
