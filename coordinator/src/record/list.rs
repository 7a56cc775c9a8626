//! Ordered list of records.

use durabletx_common::{AddOutcome, Uid};
use tracing::debug;

use super::{key_of, AbstractRecord};

/// Records kept in ascending `(order, record_type)` order.
#[derive(Debug, Default)]
pub struct RecordList {
    records: Vec<Box<dyn AbstractRecord>>,
}

impl RecordList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, consulting the insertion rules on a key collision.
    ///
    /// The incoming record is asked, in turn, whether it should replace,
    /// merge with, alter or be added after the existing record. If it
    /// declines all four the insert is rejected as a duplicate.
    pub fn insert(&mut self, record: Box<dyn AbstractRecord>) -> AddOutcome {
        let key = key_of(record.as_ref());
        let position = self
            .records
            .iter()
            .position(|existing| key_of(existing.as_ref()) >= key);

        let Some(index) = position else {
            self.records.push(record);
            return AddOutcome::Ok;
        };
        if key_of(self.records[index].as_ref()) != key {
            self.records.insert(index, record);
            return AddOutcome::Ok;
        }

        let existing = &mut self.records[index];
        if record.should_replace(existing.as_ref()) {
            debug!(record = %record.uid(), replaced = %existing.uid(), "Record replaced");
            *existing = record;
        } else if record.should_merge(existing.as_ref()) {
            existing.merge(record.as_ref());
        } else if record.should_alter(existing.as_ref()) {
            existing.alter(record.as_ref());
        } else if record.should_add(existing.as_ref()) {
            let after = self.records[index..]
                .iter()
                .take_while(|r| key_of(r.as_ref()) == key)
                .count();
            self.records.insert(index + after, record);
        } else {
            return AddOutcome::Duplicate;
        }
        AddOutcome::Ok
    }

    /// Append without applying the insertion rules.
    pub fn push_back(&mut self, record: Box<dyn AbstractRecord>) {
        self.records.push(record);
    }

    pub fn pop_front(&mut self) -> Option<Box<dyn AbstractRecord>> {
        if self.records.is_empty() {
            None
        } else {
            Some(self.records.remove(0))
        }
    }

    /// Remove and return every record, in order.
    pub fn take_all(&mut self) -> Vec<Box<dyn AbstractRecord>> {
        std::mem::take(&mut self.records)
    }

    pub fn find(&self, uid: Uid) -> Option<&dyn AbstractRecord> {
        self.records
            .iter()
            .find(|r| r.uid() == uid)
            .map(|r| r.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn AbstractRecord> {
        self.records.iter().map(|r| r.as_ref())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Extend<Box<dyn AbstractRecord>> for RecordList {
    fn extend<I: IntoIterator<Item = Box<dyn AbstractRecord>>>(&mut self, iter: I) {
        self.records.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::testing::TestRecord;

    fn orders(list: &RecordList) -> Vec<Uid> {
        list.iter().map(|r| r.order()).collect()
    }

    fn downcast(list: &RecordList, index: usize) -> &TestRecord {
        list.iter()
            .nth(index)
            .and_then(|r| r.as_any().downcast_ref::<TestRecord>())
            .unwrap()
    }

    #[test]
    fn test_insert_sorted() {
        let mut list = RecordList::new();
        let a = TestRecord::new();
        let b = TestRecord::new();
        let c = TestRecord::new();
        let (oa, ob, oc) = (a.order, b.order, c.order);

        assert_eq!(list.insert(Box::new(c)), AddOutcome::Ok);
        assert_eq!(list.insert(Box::new(a)), AddOutcome::Ok);
        assert_eq!(list.insert(Box::new(b)), AddOutcome::Ok);

        assert_eq!(orders(&list), vec![oa, ob, oc]);
    }

    #[test]
    fn test_max_order_sorts_last() {
        let mut list = RecordList::new();
        list.insert(Box::new(TestRecord::new().with_order(Uid::max())));
        list.insert(Box::new(TestRecord::new()));
        assert_eq!(list.iter().last().unwrap().order(), Uid::max());
    }

    #[test]
    fn test_equal_key_without_rules_is_duplicate() {
        let mut list = RecordList::new();
        let order = Uid::new();
        list.insert(Box::new(TestRecord::new().with_order(order)));
        assert_eq!(
            list.insert(Box::new(TestRecord::new().with_order(order))),
            AddOutcome::Duplicate
        );
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_replace() {
        let mut list = RecordList::new();
        let order = Uid::new();
        list.insert(Box::new(TestRecord::new().with_order(order)));

        let mut incoming = TestRecord::new().with_order(order);
        incoming.replace = true;
        let incoming_uid = incoming.uid;
        assert_eq!(list.insert(Box::new(incoming)), AddOutcome::Ok);
        assert_eq!(list.len(), 1);
        assert_eq!(list.iter().next().unwrap().uid(), incoming_uid);
    }

    #[test]
    fn test_merge_and_alter() {
        let mut list = RecordList::new();
        let order = Uid::new();
        list.insert(Box::new(TestRecord::new().with_order(order)));

        let mut merging = TestRecord::new().with_order(order);
        merging.merge = true;
        list.insert(Box::new(merging));

        let mut altering = TestRecord::new().with_order(order);
        altering.alter = true;
        list.insert(Box::new(altering));

        assert_eq!(list.len(), 1);
        assert_eq!(downcast(&list, 0).merged, 1);
        assert_eq!(downcast(&list, 0).altered, 1);
    }

    #[test]
    fn test_add_after_equal_records() {
        let mut list = RecordList::new();
        let order = Uid::new();
        let first = TestRecord::new().with_order(order);
        let first_uid = first.uid;
        list.insert(Box::new(first));

        let mut second = TestRecord::new().with_order(order);
        second.add = true;
        let second_uid = second.uid;
        list.insert(Box::new(second));

        let mut third = TestRecord::new().with_order(order);
        third.add = true;
        let third_uid = third.uid;
        list.insert(Box::new(third));

        let uids: Vec<Uid> = list.iter().map(|r| r.uid()).collect();
        assert_eq!(uids, vec![first_uid, second_uid, third_uid]);
    }

    #[test]
    fn test_pop_and_take() {
        let mut list = RecordList::new();
        list.insert(Box::new(TestRecord::new()));
        list.insert(Box::new(TestRecord::new()));

        assert!(list.pop_front().is_some());
        assert_eq!(list.take_all().len(), 1);
        assert!(list.is_empty());
        assert!(list.pop_front().is_none());
    }
}
