//! Priority resolution of competing registrations.
//!
//! Every registration of a value under an `(operator, column)` pair is kept
//! in a [PriorityStack]. The effective value is the entry with the highest
//! [Priority]; among equal priorities the most recently committed one wins.
//! The same [PriorityTable] backs both attributes (columns are attribute
//! keys) and lowering rules (columns are targets), so both resolve alike.

use std::fmt::{self, Display};

use rustc_hash::FxHashMap;

use crate::{
    arg_err,
    op::OpIndex,
    result::{InvalidPriorityErr, Result},
};

/// Priority level of a registration that does not specify one.
pub const DEFAULT_PRIORITY: i32 = 10;

/// Rank of a registration. Higher wins. Always greater than 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(i32);

impl Priority {
    pub fn new(level: i32) -> Result<Priority> {
        if level <= 0 {
            return arg_err!(InvalidPriorityErr(level));
        }
        Ok(Priority(level))
    }

    pub fn level(self) -> i32 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority(DEFAULT_PRIORITY)
    }
}

impl TryFrom<i32> for Priority {
    type Error = crate::result::Error;

    fn try_from(level: i32) -> Result<Self> {
        Priority::new(level)
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What became of a newly pushed entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// The entry is now the effective one.
    Installed,
    /// An entry of higher priority stays effective.
    Shadowed { by: Priority },
}

struct Ranked<V> {
    value: V,
    priority: Priority,
    /// Commit order within the owning table.
    seq: u64,
}

/// All registrations for one `(operator, column)` pair.
/// Never empty.
pub(crate) struct PriorityStack<V> {
    entries: Vec<Ranked<V>>,
    winner: usize,
}

impl<V> PriorityStack<V> {
    fn new(value: V, priority: Priority, seq: u64) -> Self {
        PriorityStack {
            entries: vec![Ranked {
                value,
                priority,
                seq,
            }],
            winner: 0,
        }
    }

    fn push(&mut self, value: V, priority: Priority, seq: u64) -> Resolution {
        let current = &self.entries[self.winner];
        let wins = (priority, seq) >= (current.priority, current.seq);
        let current_priority = current.priority;
        self.entries.push(Ranked {
            value,
            priority,
            seq,
        });
        if wins {
            self.winner = self.entries.len() - 1;
            Resolution::Installed
        } else {
            Resolution::Shadowed {
                by: current_priority,
            }
        }
    }

    pub(crate) fn effective(&self) -> &V {
        &self.entries[self.winner].value
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Column keyed, operator indexed [PriorityStack]s.
pub(crate) struct PriorityTable<V> {
    columns: FxHashMap<String, FxHashMap<OpIndex, PriorityStack<V>>>,
    next_seq: u64,
}

impl<V> Default for PriorityTable<V> {
    fn default() -> Self {
        PriorityTable {
            columns: FxHashMap::default(),
            next_seq: 0,
        }
    }
}

impl<V> PriorityTable<V> {
    /// Commit a registration. The caller holds the table exclusively, so
    /// commit order is the order of calls.
    pub(crate) fn insert(
        &mut self,
        column: &str,
        op: OpIndex,
        value: V,
        priority: Priority,
    ) -> Resolution {
        let seq = self.next_seq;
        self.next_seq += 1;
        let stacks = self.columns.entry(column.to_string()).or_default();
        match stacks.get_mut(&op) {
            Some(stack) => stack.push(value, priority, seq),
            None => {
                stacks.insert(op, PriorityStack::new(value, priority, seq));
                Resolution::Installed
            }
        }
    }

    pub(crate) fn stack(&self, column: &str, op: OpIndex) -> Option<&PriorityStack<V>> {
        self.columns.get(column).and_then(|stacks| stacks.get(&op))
    }

    pub(crate) fn get(&self, column: &str, op: OpIndex) -> Option<&V> {
        self.stack(column, op).map(PriorityStack::effective)
    }

    pub(crate) fn contains(&self, column: &str, op: OpIndex) -> bool {
        self.stack(column, op).is_some()
    }

    /// Remove every entry of `(op, column)`, at all priorities.
    /// Returns how many entries were removed.
    pub(crate) fn reset(&mut self, column: &str, op: OpIndex) -> usize {
        let Some(stacks) = self.columns.get_mut(column) else {
            return 0;
        };
        let removed = stacks.remove(&op).map_or(0, |stack| stack.len());
        if stacks.is_empty() {
            self.columns.remove(column);
        }
        removed
    }

    pub(crate) fn has_column(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    /// Effective values of all operators in `column`.
    pub(crate) fn column(&self, column: &str) -> Option<impl Iterator<Item = (OpIndex, &V)>> {
        self.columns
            .get(column)
            .map(|stacks| stacks.iter().map(|(op, stack)| (*op, stack.effective())))
    }

    /// Sorted names of the columns in which `op` has an entry.
    pub(crate) fn columns_of(&self, op: OpIndex) -> Vec<String> {
        let mut columns: Vec<String> = self
            .columns
            .iter()
            .filter(|(_, stacks)| stacks.contains_key(&op))
            .map(|(column, _)| column.clone())
            .collect();
        columns.sort();
        columns
    }
}

#[cfg(test)]
mod tests {
    use super::{Priority, PriorityTable, Resolution, DEFAULT_PRIORITY};
    use crate::result::ErrorKind;

    fn p(level: i32) -> Priority {
        Priority::new(level).unwrap()
    }

    #[test]
    fn priority_validation() {
        assert_eq!(Priority::default().level(), DEFAULT_PRIORITY);
        assert_eq!(Priority::new(0).unwrap_err().kind, ErrorKind::InvalidArgument);
        assert!(Priority::try_from(-3).is_err());
        assert!(p(1) < p(2));
    }

    #[test]
    fn higher_priority_wins() {
        let mut table = PriorityTable::default();
        assert_eq!(table.insert("k", 0, "v1", p(10)), Resolution::Installed);
        assert_eq!(table.insert("k", 0, "v2", p(20)), Resolution::Installed);
        assert_eq!(table.get("k", 0), Some(&"v2"));

        let mut table = PriorityTable::default();
        table.insert("k", 0, "v1", p(20));
        assert_eq!(
            table.insert("k", 0, "v2", p(10)),
            Resolution::Shadowed { by: p(20) }
        );
        assert_eq!(table.get("k", 0), Some(&"v1"));
    }

    #[test]
    fn ties_go_to_the_latest() {
        let mut table = PriorityTable::default();
        table.insert("k", 0, "v1", p(10));
        table.insert("k", 0, "v2", p(10));
        assert_eq!(table.get("k", 0), Some(&"v2"));
        // A lower priority entry in between does not disturb the tie break.
        table.insert("k", 0, "v3", p(5));
        table.insert("k", 0, "v4", p(10));
        assert_eq!(table.get("k", 0), Some(&"v4"));
        assert_eq!(table.stack("k", 0).unwrap().len(), 4);
    }

    #[test]
    fn reset_clears_all_levels() {
        let mut table = PriorityTable::default();
        table.insert("k", 0, 1, p(5));
        table.insert("k", 0, 2, p(50));
        table.insert("k", 1, 3, p(10));
        assert_eq!(table.reset("k", 0), 2);
        assert!(!table.contains("k", 0));
        assert!(table.contains("k", 1));
        assert!(table.has_column("k"));

        assert_eq!(table.reset("k", 1), 1);
        assert!(!table.has_column("k"));
        assert_eq!(table.reset("k", 1), 0);

        // No residue from before the reset: a low priority entry now wins.
        table.insert("k", 0, 4, p(1));
        assert_eq!(table.get("k", 0), Some(&4));
    }

    #[test]
    fn columns() {
        let mut table = PriorityTable::default();
        table.insert("llvm", 0, 'a', p(10));
        table.insert("cuda", 0, 'b', p(10));
        table.insert("cuda", 1, 'c', p(10));
        assert_eq!(table.columns_of(0), vec!["cuda", "llvm"]);
        assert_eq!(table.columns_of(1), vec!["cuda"]);
        let mut cuda: Vec<_> = table.column("cuda").unwrap().collect();
        cuda.sort();
        assert_eq!(cuda, vec![(0, &'b'), (1, &'c')]);
        assert!(table.column("metal").is_none());
    }
}
