//! Union-by-size disjoint-set forest.

/// Disjoint-set forest over non-negative integer ids.
///
/// Storage grows on demand: querying an id beyond the current capacity
/// doubles the backing arrays (or more, if needed) and registers the new ids
/// as singleton sets.
#[derive(Debug, Clone)]
pub struct DisjointSet {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DisjointSet {
    /// Create a forest of `capacity` singleton sets (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            parent: (0..capacity).collect(),
            size: vec![1; capacity],
        }
    }

    /// Current number of ids backed by storage.
    pub fn capacity(&self) -> usize {
        self.parent.len()
    }

    fn grow_to_include(&mut self, id: usize) {
        if id < self.parent.len() {
            return;
        }
        let mut new_len = self.parent.len().max(1);
        while new_len <= id {
            new_len *= 2;
        }
        let start = self.parent.len();
        self.parent.extend(start..new_len);
        self.size.resize(new_len, 1);
    }

    /// Representative of the set containing `id`.
    ///
    /// Compresses the traversed path by halving.
    pub fn find(&mut self, id: usize) -> usize {
        self.grow_to_include(id);
        let mut i = id;
        while i != self.parent[i] {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    /// Whether `p` and `q` belong to the same set.
    pub fn connected(&mut self, p: usize, q: usize) -> bool {
        self.find(p) == self.find(q)
    }

    /// Merge the sets containing `p` and `q`.
    ///
    /// The smaller tree is attached under the larger one; on equal sizes the
    /// root of `q` goes under the root of `p`.
    pub fn union(&mut self, p: usize, q: usize) {
        let i = self.find(p);
        let j = self.find(q);
        if i == j {
            return;
        }
        if self.size[i] < self.size[j] {
            self.parent[i] = j;
            self.size[j] += self.size[i];
        } else {
            self.parent[j] = i;
            self.size[i] += self.size[j];
        }
    }

    /// Size of the set containing `id`.
    pub fn set_size(&mut self, id: usize) -> usize {
        let root = self.find(id);
        self.size[root]
    }
}
