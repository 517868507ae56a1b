//! Page-directory arena.
//!
//! Directories refer to their parent and children by [`DirId`]; the walk back to the root
//! needed to locate an entry in the address space is a sequence of bounds-checked lookups.

use crate::address::GpuPhysAddress;
use crate::error::{Result, UvmError};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DirId(u32);

impl DirId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    pub depth: u32,
    /// Index of the entry pointing at this directory in its parent.
    pub index_in_parent: u32,
    pub parent: Option<DirId>,
    /// Child directories plus PTEs handed out from this directory.
    pub ref_count: u32,
    /// Child slots, `entries_per_index` per index. Empty for tables that only ever hold PTEs.
    pub entries: Vec<Option<DirId>>,
    pub phys: GpuPhysAddress,
    pub size: usize,
}

#[derive(Debug, Default)]
pub struct DirectoryArena {
    slots: Vec<Option<Directory>>,
    free: Vec<u32>,
}

impl DirectoryArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, dir: Directory) -> DirId {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot as usize] = Some(dir);
                DirId(slot)
            }
            None => {
                self.slots.push(Some(dir));
                DirId((self.slots.len() - 1) as u32)
            }
        }
    }

    pub fn remove(&mut self, id: DirId) -> Result<Directory> {
        let dir = self
            .slots
            .get_mut(id.index())
            .and_then(Option::take)
            .ok_or_else(|| UvmError::invalid_state(format!("directory {id:?} does not exist")))?;
        self.free.push(id.0);
        Ok(dir)
    }

    pub fn get(&self, id: DirId) -> Result<&Directory> {
        self.slots
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| UvmError::invalid_state(format!("directory {id:?} does not exist")))
    }

    pub fn get_mut(&mut self, id: DirId) -> Result<&mut Directory> {
        self.slots
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| UvmError::invalid_state(format!("directory {id:?} does not exist")))
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index taken at each ancestor to reach `id`, root first.
    pub fn index_path(&self, id: DirId) -> Result<Vec<u32>> {
        let mut path = Vec::new();
        let mut cur = self.get(id)?;
        while let Some(parent) = cur.parent {
            path.push(cur.index_in_parent);
            cur = self.get(parent)?;
        }
        path.reverse();
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir(depth: u32, parent: Option<DirId>, index_in_parent: u32) -> Directory {
        Directory {
            depth,
            index_in_parent,
            parent,
            ref_count: 0,
            entries: Vec::new(),
            phys: GpuPhysAddress::vid(0x1000 * u64::from(depth)),
            size: 0x1000,
        }
    }

    #[test]
    fn index_path_walks_to_root() {
        let mut arena = DirectoryArena::new();
        let root = arena.insert(dir(0, None, 0));
        let a = arena.insert(dir(1, Some(root), 3));
        let b = arena.insert(dir(2, Some(a), 7));
        assert_eq!(arena.index_path(root).unwrap(), Vec::<u32>::new());
        assert_eq!(arena.index_path(b).unwrap(), vec![3, 7]);
    }

    #[test]
    fn removed_slots_are_reused_and_stale_ids_fail() {
        let mut arena = DirectoryArena::new();
        let root = arena.insert(dir(0, None, 0));
        let a = arena.insert(dir(1, Some(root), 0));
        arena.remove(a).unwrap();
        assert!(arena.get(a).is_err());
        assert!(arena.remove(a).is_err());
        let b = arena.insert(dir(1, Some(root), 1));
        assert_eq!(a, b);
        assert_eq!(arena.len(), 2);
    }
}
