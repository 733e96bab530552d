use std::collections::HashMap;

use crate::observer::entity::EntityType;
use crate::observer::operation::OperationRecord;

/// Operations sharing one entity type, in change-log order
#[derive(Debug)]
pub struct EntityGroup<'a> {
    pub entity_type: EntityType,
    pub operations: Vec<&'a OperationRecord>,
}

/// Ordered buffer of operations observed in one transaction
#[derive(Debug, Default)]
pub struct ChangeLog {
    records: Vec<OperationRecord>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: OperationRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OperationRecord> {
        self.records.iter()
    }

    pub fn records(&self) -> &[OperationRecord] {
        &self.records
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Group records by entity type.
    ///
    /// Groups appear in order of first occurrence of their type; records keep
    /// their log order within a group.
    pub fn group_by_entity_type(&self) -> Vec<EntityGroup<'_>> {
        let mut groups: Vec<EntityGroup<'_>> = Vec::new();
        let mut index: HashMap<EntityType, usize> = HashMap::new();

        for record in &self.records {
            let entity_type = record.entity_type();
            let slot = *index.entry(entity_type).or_insert_with(|| {
                groups.push(EntityGroup {
                    entity_type,
                    operations: Vec::new(),
                });
                groups.len() - 1
            });
            groups[slot].operations.push(record);
        }

        groups
    }
}
