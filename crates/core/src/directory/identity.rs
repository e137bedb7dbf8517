use std::collections::BTreeSet;
use std::fmt;

/// Stable handle addressing a replicated entity on every peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u16);

impl InstanceId {
    pub const MAX: u16 = i16::MAX as u16;

    pub fn new(raw: u16) -> Option<Self> {
        (raw <= Self::MAX).then_some(Self(raw))
    }

    pub fn get(self) -> u16 {
        self.0
    }

    pub fn to_wire(self) -> i16 {
        self.0 as i16
    }

    pub fn from_wire(raw: i16) -> Option<Self> {
        u16::try_from(raw).ok().and_then(Self::new)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out ids in increasing order, reusing the lowest released id first.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: u16,
    free: BTreeSet<u16>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> Option<InstanceId> {
        if let Some(id) = self.free.pop_first() {
            return InstanceId::new(id);
        }
        let id = InstanceId::new(self.next)?;
        self.next += 1;
        Some(id)
    }

    pub fn release(&mut self, id: InstanceId) {
        if id.0 < self.next {
            self.free.insert(id.0);
        }
    }

    pub fn in_use(&self) -> usize {
        self.next as usize - self.free.len()
    }

    pub fn reset(&mut self) {
        self.next = 0;
        self.free.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_is_monotonic() {
        let mut ids = IdAllocator::new();
        let a = ids.allocate().unwrap();
        let b = ids.allocate().unwrap();
        assert_eq!((a.get(), b.get()), (0, 1));
    }

    #[test]
    fn test_lowest_freed_reused_first() {
        let mut ids = IdAllocator::new();
        let all: Vec<_> = (0..5).map(|_| ids.allocate().unwrap()).collect();
        ids.release(all[3]);
        ids.release(all[1]);

        assert_eq!(ids.allocate().unwrap().get(), 1);
        assert_eq!(ids.allocate().unwrap().get(), 3);
        assert_eq!(ids.allocate().unwrap().get(), 5);
        assert_eq!(ids.in_use(), 6);
    }

    #[test]
    fn test_exhaustion() {
        let mut ids = IdAllocator {
            next: InstanceId::MAX,
            free: BTreeSet::new(),
        };
        assert_eq!(ids.allocate().map(InstanceId::get), Some(InstanceId::MAX));
        assert!(ids.allocate().is_none());
    }

    #[test]
    fn test_wire_rejects_negative() {
        assert!(InstanceId::from_wire(-1).is_none());
        assert_eq!(InstanceId::from_wire(7).map(InstanceId::get), Some(7));
    }
}
