use std::collections::HashMap;

use super::RpcError;

/// Position of a method in the shared table; identical on every peer as
/// long as registration order matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodIndex(pub u16);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub type_name: String,
    pub name: String,
    pub arg_count: usize,
}

#[derive(Debug, Default)]
pub struct MethodTable {
    methods: Vec<MethodDescriptor>,
    by_name: HashMap<String, MethodIndex>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, type_name: &str, name: &str, arg_count: usize) -> Result<MethodIndex, RpcError> {
        if self.by_name.contains_key(name) {
            return Err(RpcError::DuplicateMethod(name.to_string()));
        }
        let index = u16::try_from(self.methods.len())
            .ok()
            .filter(|&index| index <= i16::MAX as u16)
            .map(MethodIndex)
            .ok_or(RpcError::TableFull)?;

        self.methods.push(MethodDescriptor {
            type_name: type_name.to_string(),
            name: name.to_string(),
            arg_count,
        });
        self.by_name.insert(name.to_string(), index);
        Ok(index)
    }

    pub fn lookup(&self, name: &str) -> Option<(MethodIndex, &MethodDescriptor)> {
        let index = *self.by_name.get(name)?;
        self.get(index).map(|method| (index, method))
    }

    pub fn get(&self, index: MethodIndex) -> Option<&MethodDescriptor> {
        self.methods.get(index.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MethodIndex, &MethodDescriptor)> {
        self.methods
            .iter()
            .enumerate()
            .map(|(i, method)| (MethodIndex(i as u16), method))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_follow_registration_order() {
        let mut table = MethodTable::new();
        assert_eq!(table.register("Player", "Move", 1).unwrap(), MethodIndex(0));
        assert_eq!(table.register("Player", "Jump", 0).unwrap(), MethodIndex(1));

        let (index, method) = table.lookup("Jump").unwrap();
        assert_eq!(index, MethodIndex(1));
        assert_eq!(method.arg_count, 0);
        assert_eq!(table.get(MethodIndex(0)).unwrap().name, "Move");
        assert!(table.get(MethodIndex(2)).is_none());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut table = MethodTable::new();
        table.register("Player", "Move", 1).unwrap();
        assert!(matches!(
            table.register("Door", "Move", 0),
            Err(RpcError::DuplicateMethod(_))
        ));
        assert_eq!(table.len(), 1);
    }
}
