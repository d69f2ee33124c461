//! Per-session pending change set
//!
//! Each host session owns one `AuditSession`. The collector appends to it
//! during the prepare phase and the writer drains it after the host commit.

use super::entry::ChangeRecord;

/// Ordered change records of one commit cycle
#[derive(Debug, Default)]
pub struct AuditSession {
    records: Vec<ChangeRecord>,
}

impl AuditSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ChangeRecord) {
        self.records.push(record);
    }

    /// Append the output of one collect pass, preserving its order
    pub fn extend(&mut self, records: impl IntoIterator<Item = ChangeRecord>) {
        self.records.extend(records);
    }

    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Forget everything pending; called after a successful drain
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Drop the pending records of an aborted cycle, returning how many there were
    pub fn discard(&mut self) -> usize {
        let count = self.records.len();
        self.records.clear();
        count
    }
}
