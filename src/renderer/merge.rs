use std::cmp::Ordering;
use std::ops::Range;

/// Cursor into one run: `position` is the index of its next unmerged element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeapEntry {
    run: usize,
    position: usize,
}

/// Binary min-heap driving a k-way merge of adjacent runs.
///
/// The key of an entry is the element it points at, compared with an external
/// comparator; ties go to the lower run index so equal keys keep their
/// original run order. The backing storage is kept between merges.
#[derive(Debug, Default)]
pub(crate) struct MergeHeap {
    entries: Vec<HeapEntry>,
}

impl MergeHeap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    /// Merges `runs` of `source` into `output`.
    ///
    /// Each run keeps its internal order; across runs the smallest head under
    /// `compare` is taken first. `output` receives exactly the elements of all
    /// runs.
    pub(crate) fn merge_runs<T: Copy>(
        &mut self,
        source: &[T],
        runs: &[Range<usize>],
        output: &mut Vec<T>,
        mut compare: impl FnMut(&T, &T) -> Ordering,
    ) {
        self.entries.clear();

        let mut less = |a: &HeapEntry, b: &HeapEntry| {
            match compare(&source[a.position], &source[b.position]) {
                Ordering::Less => true,
                Ordering::Greater => false,
                Ordering::Equal => a.run < b.run,
            }
        };

        for (run, range) in runs.iter().enumerate() {
            if !range.is_empty() {
                self.push(
                    HeapEntry {
                        run,
                        position: range.start,
                    },
                    &mut less,
                );
            }
        }

        while let Some(entry) = self.pop(&mut less) {
            output.push(source[entry.position]);
            let next = entry.position + 1;
            if next < runs[entry.run].end {
                self.push(
                    HeapEntry {
                        run: entry.run,
                        position: next,
                    },
                    &mut less,
                );
            }
        }
    }

    fn push(&mut self, entry: HeapEntry, less: &mut impl FnMut(&HeapEntry, &HeapEntry) -> bool) {
        self.entries.push(entry);
        let mut child = self.entries.len() - 1;
        while child > 0 {
            let parent = (child - 1) / 2;
            if !less(&self.entries[child], &self.entries[parent]) {
                break;
            }
            self.entries.swap(child, parent);
            child = parent;
        }
    }

    fn pop(&mut self, less: &mut impl FnMut(&HeapEntry, &HeapEntry) -> bool) -> Option<HeapEntry> {
        if self.entries.is_empty() {
            return None;
        }
        let last = self.entries.len() - 1;
        self.entries.swap(0, last);
        let top = self.entries.pop();

        let len = self.entries.len();
        let mut parent = 0;
        loop {
            let left = 2 * parent + 1;
            let right = left + 1;
            let mut smallest = parent;
            if left < len && less(&self.entries[left], &self.entries[smallest]) {
                smallest = left;
            }
            if right < len && less(&self.entries[right], &self.entries[smallest]) {
                smallest = right;
            }
            if smallest == parent {
                break;
            }
            self.entries.swap(parent, smallest);
            parent = smallest;
        }

        top
    }
}
