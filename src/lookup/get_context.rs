//! Per-key lookup state shared by memtables, table files and the row cache.

use crate::error::{Error, Result};
use crate::memtable::ValueType;
use crate::merge_operator::MergeOperator;

/// Where a key lookup currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetState {
    /// Nothing seen yet.
    NotFound,
    /// A value was produced.
    Found,
    /// A tombstone hides older versions.
    Deleted,
    /// Merge operands collected; still looking for a base.
    Merge,
    /// The merge could not be completed.
    Failed,
}

/// Accumulates the entries for one user key, newest first.
///
/// Sources feed entries through [`save_value`](GetContext::save_value) in
/// newest-to-oldest order and stop as soon as it returns `false`.
pub struct GetContext<'a> {
    user_key: &'a [u8],
    merge_operator: Option<&'a dyn MergeOperator>,
    state: GetState,
    value: Option<Vec<u8>>,
    // newest first
    operands: Vec<Vec<u8>>,
    error: Option<Error>,
    replay: Option<Vec<(ValueType, Vec<u8>)>>,
}

impl<'a> GetContext<'a> {
    /// Starts a lookup for `user_key`.
    pub fn new(user_key: &'a [u8], merge_operator: Option<&'a dyn MergeOperator>) -> Self {
        Self {
            user_key,
            merge_operator,
            state: GetState::NotFound,
            value: None,
            operands: Vec::new(),
            error: None,
            replay: None,
        }
    }

    /// The key being looked up.
    pub fn user_key(&self) -> &[u8] {
        self.user_key
    }

    /// Current state.
    pub fn state(&self) -> GetState {
        self.state
    }

    /// True once a final answer is known.
    pub fn is_done(&self) -> bool {
        !matches!(self.state, GetState::NotFound | GetState::Merge)
    }

    /// Feeds one visible entry. Returns true if older entries are still needed.
    pub fn save_value(&mut self, value_type: ValueType, value: &[u8]) -> bool {
        if let Some(log) = self.replay.as_mut() {
            log.push((value_type, value.to_vec()));
        }
        match value_type {
            ValueType::Value => {
                if self.state == GetState::Merge {
                    self.fold(Some(value));
                } else {
                    self.state = GetState::Found;
                    self.value = Some(value.to_vec());
                }
                false
            }
            ValueType::Deletion | ValueType::SingleDeletion => {
                if self.state == GetState::Merge {
                    self.fold(None);
                } else {
                    self.state = GetState::Deleted;
                }
                false
            }
            ValueType::Merge => {
                self.state = GetState::Merge;
                self.operands.push(value.to_vec());
                true
            }
        }
    }

    /// Starts recording every entry fed from now on.
    pub fn start_replay_log(&mut self) {
        self.replay = Some(Vec::new());
    }

    /// Stops recording and returns what was fed since `start_replay_log`.
    pub fn take_replay_log(&mut self) -> Vec<(ValueType, Vec<u8>)> {
        self.replay.take().unwrap_or_default()
    }

    /// Feeds a recorded sequence of entries.
    pub fn replay(&mut self, log: &[(ValueType, Vec<u8>)]) -> bool {
        for (value_type, value) in log {
            if !self.save_value(*value_type, value) {
                return false;
            }
        }
        true
    }

    fn fold(&mut self, base: Option<&[u8]>) {
        let Some(op) = self.merge_operator else {
            self.state = GetState::Failed;
            self.error = Some(Error::invalid_argument("merge operator is not configured"));
            return;
        };
        let operands: Vec<&[u8]> = self.operands.iter().rev().map(|o| o.as_slice()).collect();
        match op.full_merge(self.user_key, base, &operands) {
            Some(merged) => {
                self.state = GetState::Found;
                self.value = Some(merged);
            }
            None => {
                self.state = GetState::Failed;
                self.error = Some(Error::corruption(format!(
                    "merge operator {} failed for key of {} bytes",
                    op.name(),
                    self.user_key.len()
                )));
            }
        }
        self.operands.clear();
    }

    /// Resolves the lookup once every source has been consulted.
    pub fn finish(mut self) -> Result<Option<Vec<u8>>> {
        if self.state == GetState::Merge {
            self.fold(None);
        }
        match self.state {
            GetState::Found => Ok(self.value),
            GetState::NotFound | GetState::Deleted => Ok(None),
            GetState::Merge | GetState::Failed => {
                Err(self.error.unwrap_or_else(|| Error::internal("unresolved merge")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge_operator::StringAppendOperator;

    #[test]
    fn test_value_stops_lookup() {
        let mut ctx = GetContext::new(b"k", None);
        assert!(!ctx.save_value(ValueType::Value, b"v"));
        assert!(ctx.is_done());
        assert_eq!(ctx.finish().unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_tombstone_is_not_found() {
        let mut ctx = GetContext::new(b"k", None);
        assert!(!ctx.save_value(ValueType::SingleDeletion, b""));
        assert_eq!(ctx.state(), GetState::Deleted);
        assert_eq!(ctx.finish().unwrap(), None);
    }

    #[test]
    fn test_merge_folds_oldest_first() {
        let op = StringAppendOperator::default();
        let mut ctx = GetContext::new(b"k", Some(&op));
        assert!(ctx.save_value(ValueType::Merge, b"v3"));
        assert!(ctx.save_value(ValueType::Merge, b"v2"));
        assert!(!ctx.save_value(ValueType::Value, b"v1"));
        assert_eq!(ctx.finish().unwrap(), Some(b"v1,v2,v3".to_vec()));
    }

    #[test]
    fn test_merge_without_base() {
        let op = StringAppendOperator::default();
        let mut ctx = GetContext::new(b"k", Some(&op));
        ctx.save_value(ValueType::Merge, b"b");
        ctx.save_value(ValueType::Merge, b"a");
        assert_eq!(ctx.finish().unwrap(), Some(b"a,b".to_vec()));
    }

    #[test]
    fn test_merge_on_tombstone() {
        let op = StringAppendOperator::default();
        let mut ctx = GetContext::new(b"k", Some(&op));
        ctx.save_value(ValueType::Merge, b"x");
        assert!(!ctx.save_value(ValueType::Deletion, b""));
        assert_eq!(ctx.finish().unwrap(), Some(b"x".to_vec()));
    }

    #[test]
    fn test_merge_without_operator_fails() {
        let mut ctx = GetContext::new(b"k", None);
        ctx.save_value(ValueType::Merge, b"x");
        assert!(matches!(ctx.finish(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_replay_log_reproduces_state() {
        let op = StringAppendOperator::default();
        let mut first = GetContext::new(b"k", Some(&op));
        first.start_replay_log();
        first.save_value(ValueType::Merge, b"2");
        first.save_value(ValueType::Value, b"1");
        let log = first.take_replay_log();
        assert_eq!(log.len(), 2);

        let mut second = GetContext::new(b"k", Some(&op));
        assert!(!second.replay(&log));
        assert_eq!(second.finish().unwrap(), first.finish().unwrap());
    }
}
