use std::cmp::min;

use crate::utils::MyHash;

#[derive(Clone)]
struct Slot<T> {
    value: T,
    next: usize,
    occupied: bool,
}

impl<T: Default> Default for Slot<T> {
    fn default() -> Self {
        Self {
            value: T::default(),
            next: 0,
            occupied: false,
        }
    }
}

/// Hash-consing node store: a fixed-capacity arena with bucketed
/// collision chains, so that structurally equal values share an index.
pub struct Table<T> {
    data: Vec<Slot<T>>,
    buckets: Vec<usize>,
    bitmask: u64,
    /// Index of the first *possibly* free slot.
    min_free: usize,
    /// Index of the last occupied slot.
    last_index: usize,
    /// Number of occupied slots.
    real_size: usize,
}

impl<T: Default> Table<T> {
    /// Create a new table of size `2^bits`.
    pub fn new(bits: usize) -> Self {
        assert!(bits <= 31, "Storage bits should be in the range 0..=31");

        let capacity = 1 << bits;
        let mut data: Vec<Slot<T>> = Vec::with_capacity(capacity);
        data.resize_with(capacity, Slot::default);
        data[0].occupied = true; // 0th slot is the sentry

        let buckets_bits = min(bits, 16);
        let buckets_size = 1 << buckets_bits;

        Self {
            data,
            buckets: vec![0; buckets_size],
            bitmask: (buckets_size - 1) as u64,
            min_free: 1,
            last_index: 0,
            real_size: 0,
        }
    }
}

impl<T> Table<T> {
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Index of the last occupied slot.
    pub fn size(&self) -> usize {
        self.last_index
    }

    /// Number of occupied slots.
    pub fn real_size(&self) -> usize {
        self.real_size
    }

    pub fn value(&self, index: usize) -> &T {
        debug_assert_ne!(index, 0, "Index is 0");
        &self.data[index].value
    }

    pub fn is_occupied(&self, index: usize) -> bool {
        debug_assert_ne!(index, 0, "Index is 0");
        self.data[index].occupied
    }

    pub fn next(&self, index: usize) -> usize {
        debug_assert_ne!(index, 0, "Index is 0");
        self.data[index].next
    }

    pub fn set_next(&mut self, index: usize, next: usize) {
        debug_assert_ne!(index, 0, "Index is 0");
        self.data[index].next = next;
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn bucket(&self, i: usize) -> usize {
        self.buckets[i]
    }

    pub fn set_bucket(&mut self, i: usize, index: usize) {
        self.buckets[i] = index;
    }

    fn alloc(&mut self) -> usize {
        let index = (self.min_free..=self.last_index)
            .find(|&i| !self.is_occupied(i))
            .unwrap_or_else(|| {
                self.last_index += 1;
                self.last_index
            });

        if index >= self.capacity() {
            panic!("Node storage is full");
        }

        self.data[index].occupied = true;
        self.min_free = index + 1;
        self.real_size += 1;

        index
    }

    /// Drop the value at the given index.
    pub fn drop(&mut self, index: usize) {
        debug_assert_ne!(index, 0, "Index is 0");

        self.data[index].occupied = false;
        self.min_free = min(self.min_free, index);
        self.real_size -= 1;
    }

    fn add(&mut self, value: T) -> usize {
        let index = self.alloc();
        self.data[index].value = value;
        self.data[index].next = 0;
        index
    }
}

impl<T: MyHash + Eq> Table<T> {
    fn bucket_index(&self, value: &T) -> usize {
        (value.hash() & self.bitmask) as usize
    }

    /// Put a value into the table, reusing an existing structurally equal
    /// slot if there is one, and return its index.
    pub fn put(&mut self, value: T) -> usize {
        let bucket_index = self.bucket_index(&value);
        let mut index = self.buckets[bucket_index];

        if index == 0 {
            let i = self.add(value);
            self.buckets[bucket_index] = i;
            return i;
        }

        loop {
            debug_assert!(index > 0);

            if &value == self.value(index) {
                return index;
            }

            let next = self.next(index);
            if next == 0 {
                let i = self.add(value);
                self.set_next(index, i);
                return i;
            }
            index = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
    struct Item(i32);

    impl MyHash for Item {
        fn hash(&self) -> u64 {
            self.0.unsigned_abs() as u64
        }
    }

    #[test]
    fn test_put_dedup() {
        let mut table = Table::new(4);
        let a = table.put(Item(5));
        let b = table.put(Item(5));
        assert_eq!(a, b);
        assert_eq!(table.real_size(), 1);
    }

    #[test]
    fn test_put_collision_chain() {
        let mut table = Table::new(4);
        let a = table.put(Item(5));
        let b = table.put(Item(-5)); // same hash, different value
        assert_ne!(a, b);
        assert_eq!(table.next(a), b);
    }

    #[test]
    fn test_drop_frees_slot() {
        let mut table = Table::new(4);
        let a = table.put(Item(1));
        assert!(table.is_occupied(a));
        table.drop(a);
        assert!(!table.is_occupied(a));
    }
}
