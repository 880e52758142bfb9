use super::records::{ImportRecord, ImportRecordType};
use std::collections::{HashSet, VecDeque};

/// A record waiting to be imported, with the label shown in progress events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportItem {
    pub record_type: ImportRecordType,
    pub key: String,
    pub name: String,
    pub record: ImportRecord,

    /// Failed attempts so far
    pub attempts: u32,
}

impl ImportItem {
    pub fn new(record: ImportRecord) -> Self {
        Self {
            record_type: record.record_type(),
            key: record.key(),
            name: record.display_name(),
            record,
            attempts: 0,
        }
    }
}

/// FIFO of import items, unique by record type and key.
#[derive(Debug, Default)]
pub struct ImportQueue {
    items: VecDeque<ImportItem>,
    queued: HashSet<(ImportRecordType, String)>,
}

impl ImportQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item unless one with the same type and key was already queued.
    pub fn enqueue(&mut self, item: ImportItem) -> bool {
        if !self.queued.insert((item.record_type, item.key.clone())) {
            return false;
        }
        self.items.push_back(item);
        true
    }

    pub fn contains(&self, record: &ImportRecord) -> bool {
        self.queued.contains(&(record.record_type(), record.key()))
    }

    pub fn dequeue(&mut self) -> Option<ImportItem> {
        self.items.pop_front()
    }

    /// Put a failed item back at the end for another attempt.
    pub fn requeue(&mut self, mut item: ImportItem) {
        item.attempts += 1;
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImportItem> {
        self.items.iter()
    }

    /// Drop every pending item and forget which keys were queued.
    pub fn clear(&mut self) {
        self.items.clear();
        self.queued.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_deduplicates_by_type_and_key() {
        let mut queue = ImportQueue::new();

        assert!(queue.enqueue(ImportItem::new(ImportRecord::Genre("Shooter".into()))));
        assert!(!queue.enqueue(ImportItem::new(ImportRecord::Genre("Shooter".into()))));
        // Same key, different type
        assert!(queue.enqueue(ImportItem::new(ImportRecord::Tag("Shooter".into()))));

        assert_eq!(queue.len(), 2);
        assert!(queue.contains(&ImportRecord::Tag("Shooter".into())));
    }

    #[test]
    fn test_requeue_goes_to_the_back() {
        let mut queue = ImportQueue::new();
        queue.enqueue(ImportItem::new(ImportRecord::Developer("id Software".into())));
        queue.enqueue(ImportItem::new(ImportRecord::Publisher("Activision".into())));

        let first = queue.dequeue().unwrap();
        queue.requeue(first);

        let names: Vec<&str> = queue.iter().map(|item| item.key.as_str()).collect();
        assert_eq!(names, vec!["Activision", "id Software"]);
        assert_eq!(queue.iter().last().unwrap().attempts, 1);
    }
}
