// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::bucket::Bucket;
use crate::error::Error;

use core::fmt;

/// Number of bucket slots added on each allocation step.
pub const DEFAULT_CAPACITY: usize = 100;

/// Upper bound on allocation requests: one slot for every representable
/// bucket (invalid, zero, and 2 signs x 90 values x 256 exponents).
pub const MAX_BUCKETS: usize = 2 + 2 * 90 * 256;

#[derive(Clone, Copy, Debug)]
pub(crate) struct Pair {
    pub(crate) bucket: Bucket,
    pub(crate) count: u64,
}

// Two-level lookup from a bucket's two bytes to its position in the sorted
// store. The outer level is indexed by the exponent byte, the inner by the
// val byte. Entries are 1-based; 0 means absent.
#[derive(Clone)]
struct FastIndex {
    rows: [Option<Box<[u16; 256]>>; 256],
}

impl FastIndex {
    fn new() -> Self {
        Self {
            rows: core::array::from_fn(|_| None),
        }
    }

    fn get(&self, bucket: Bucket) -> Option<usize> {
        let [val, exp] = bucket.to_bytes();
        let slot = self.rows[exp as usize].as_ref()?[val as usize];
        if slot == 0 {
            None
        } else {
            Some(slot as usize - 1)
        }
    }

    fn set(&mut self, bucket: Bucket, idx: usize) {
        let [val, exp] = bucket.to_bytes();
        let row = self.rows[exp as usize].get_or_insert_with(|| Box::new([0u16; 256]));
        row[val as usize] = (idx + 1) as u16;
    }

    fn clear(&mut self) {
        for row in self.rows.iter_mut().flatten() {
            row.fill(0);
        }
    }
}

/// A sparse histogram over decimal log-linear buckets.
///
/// Storage is an ordered sequence of bucket/count pairs, so memory use is
/// proportional to the number of distinct buckets touched rather than the
/// representable range. Counts saturate at `u64::MAX` on insert and at zero
/// on removal; the return value of those operations carries the count
/// actually applied.
///
/// The fast variant (see [`Histogram::new_fast`]) adds a direct lookup table
/// from a bucket's two-byte key to its storage position, making repeat
/// inserts into existing buckets O(1) at the cost of up to 2 KiB plus 512
/// bytes per distinct exponent in use.
#[derive(Clone)]
pub struct Histogram {
    pub(crate) bvs: Vec<Pair>,
    fast: Option<FastIndex>,
}

impl Histogram {
    /// Creates a histogram with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a histogram with room for `nbins` buckets before the first
    /// grow. Requests are clamped to `1..=MAX_BUCKETS`.
    pub fn with_capacity(nbins: usize) -> Self {
        let nbins = if nbins < 1 {
            DEFAULT_CAPACITY
        } else {
            nbins.min(MAX_BUCKETS)
        };
        Self {
            bvs: Vec::with_capacity(nbins),
            fast: None,
        }
    }

    /// Creates a histogram with the fast lookup table enabled.
    pub fn new_fast() -> Self {
        Self::fast_with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a fast histogram with room for `nbins` buckets.
    pub fn fast_with_capacity(nbins: usize) -> Self {
        let mut histogram = Self::with_capacity(nbins);
        histogram.fast = Some(FastIndex::new());
        histogram
    }

    /// Returns whether this histogram carries the fast lookup table.
    pub fn is_fast(&self) -> bool {
        self.fast.is_some()
    }

    /// Returns the number of buckets in use.
    pub fn bucket_count(&self) -> usize {
        self.bvs.len()
    }

    /// Returns true if no buckets are in use.
    pub fn is_empty(&self) -> bool {
        self.bvs.is_empty()
    }

    /// Returns the total number of samples recorded, saturating at
    /// `u64::MAX`.
    pub fn sample_count(&self) -> u64 {
        self.bvs
            .iter()
            .fold(0u64, |total, pair| total.saturating_add(pair.count))
    }

    /// Returns the zero-closest bucket edge and count at position `idx` in
    /// bucket order.
    pub fn get(&self, idx: usize) -> Option<(f64, u64)> {
        self.bvs.get(idx).map(|pair| (pair.bucket.to_f64(), pair.count))
    }

    /// Returns the bucket and count at position `idx` in bucket order.
    pub fn get_bucket(&self, idx: usize) -> Option<(Bucket, u64)> {
        self.bvs.get(idx).map(|pair| (pair.bucket, pair.count))
    }

    /// Returns an iterator over the bucket/count pairs in bucket order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            inner: self.bvs.iter(),
        }
    }

    // Locates `bucket`, probing the fast table first when present. Returns
    // `Ok` with the position or `Err` with the insertion point.
    fn find(&self, bucket: Bucket) -> Result<usize, usize> {
        if let Some(fast) = &self.fast {
            if let Some(idx) = fast.get(bucket) {
                return Ok(idx);
            }
        }
        self.bvs.binary_search_by(|pair| pair.bucket.cmp(&bucket))
    }

    // Grows by a fixed step rather than doubling; allocation requests never
    // exceed MAX_BUCKETS slots.
    fn reserve_for_one(&mut self) {
        if self.bvs.len() == self.bvs.capacity() {
            let room = MAX_BUCKETS.saturating_sub(self.bvs.capacity());
            let step = DEFAULT_CAPACITY.min(room).max(1);
            self.bvs.reserve_exact(step);
        }
    }

    // Drops the current contents and pre-sizes for `capacity` buckets.
    pub(crate) fn reset_storage(&mut self, capacity: usize) {
        self.bvs = Vec::with_capacity(capacity.min(MAX_BUCKETS));
        if let Some(fast) = self.fast.as_mut() {
            fast.clear();
        }
    }

    fn rebuild_fast(&mut self) {
        if let Some(fast) = self.fast.as_mut() {
            fast.clear();
            for (idx, pair) in self.bvs.iter().enumerate() {
                fast.set(pair.bucket, idx);
            }
        }
    }

    /// Records `count` samples of `value`. Returns the count actually
    /// applied, which is smaller than `count` only when the bucket
    /// saturates.
    pub fn insert(&mut self, value: f64, count: u64) -> u64 {
        self.insert_bucket(Bucket::from_f64(value), count)
    }

    /// Records `count` samples of `value * 10^scale`.
    pub fn insert_int_scale(&mut self, value: i64, scale: i32, count: u64) -> u64 {
        self.insert_bucket(Bucket::from_int_scale(value, scale), count)
    }

    /// Records `count` samples directly into `bucket`. Invalid buckets are
    /// elided and report zero samples applied.
    pub fn insert_bucket(&mut self, bucket: Bucket, count: u64) -> u64 {
        if bucket == Bucket::Invalid {
            return 0;
        }
        match self.find(bucket) {
            Ok(idx) => {
                let old = self.bvs[idx].count;
                let new = old.saturating_add(count);
                self.bvs[idx].count = new;
                new - old
            }
            Err(idx) => {
                self.reserve_for_one();
                self.bvs.insert(idx, Pair { bucket, count });
                if let Some(fast) = self.fast.as_mut() {
                    // everything from the insertion point on has shifted
                    for (i, pair) in self.bvs.iter().enumerate().skip(idx) {
                        fast.set(pair.bucket, i);
                    }
                }
                count
            }
        }
    }

    /// Like [`Histogram::insert_bucket`], but optimized for the case that
    /// `bucket` is larger than any bucket in use. Falls back to the general
    /// path when it is not.
    pub fn insert_bucket_end(&mut self, bucket: Bucket, count: u64) -> u64 {
        if bucket == Bucket::Invalid {
            return 0;
        }
        if self.try_append(bucket, count) {
            count
        } else {
            self.insert_bucket(bucket, count)
        }
    }

    // Appends when `bucket` is strictly greater than the current maximum
    // (or the store is empty), keeping the sort invariant without a search.
    pub(crate) fn try_append(&mut self, bucket: Bucket, count: u64) -> bool {
        let in_order = match self.bvs.last() {
            Some(last) => last.bucket < bucket,
            None => true,
        };
        if in_order {
            self.reserve_for_one();
            self.bvs.push(Pair { bucket, count });
            if let Some(fast) = self.fast.as_mut() {
                fast.set(bucket, self.bvs.len() - 1);
            }
        }
        in_order
    }

    /// Removes up to `count` samples of `value`, saturating at zero.
    /// Returns the count actually removed; a missing bucket removes
    /// nothing. The bucket entry itself is retained (see
    /// [`Histogram::remove_zeroes`]).
    pub fn remove(&mut self, value: f64, count: u64) -> u64 {
        self.remove_bucket(Bucket::from_f64(value), count)
    }

    /// Removes up to `count` samples from `bucket`, saturating at zero.
    pub fn remove_bucket(&mut self, bucket: Bucket, count: u64) -> u64 {
        match self.find(bucket) {
            Ok(idx) => {
                let old = self.bvs[idx].count;
                let new = old.saturating_sub(count);
                self.bvs[idx].count = new;
                old - new
            }
            Err(_) => 0,
        }
    }

    /// Zeroes every count while keeping the buckets allocated.
    pub fn clear(&mut self) {
        for pair in &mut self.bvs {
            pair.count = 0;
        }
        if let Some(fast) = self.fast.as_mut() {
            fast.clear();
        }
    }

    /// Compacts away buckets whose count has dropped to zero.
    pub fn remove_zeroes(&mut self) {
        self.bvs.retain(|pair| pair.count != 0);
        self.rebuild_fast();
    }

    /// Merges the buckets of every histogram in `sources` into this one,
    /// saturating counts at `u64::MAX`. Returns the number of buckets in
    /// use afterwards.
    pub fn accumulate(&mut self, sources: &[&Histogram]) -> usize {
        let snapshot = core::mem::take(&mut self.bvs);
        let mut inputs: Vec<&[Pair]> = sources.iter().map(|h| h.bvs.as_slice()).collect();
        inputs.push(snapshot.as_slice());

        // First pass sizes the unified store, second pass fills it.
        let needed = merge_walk(&inputs, |_, _| {});
        let mut merged: Vec<Pair> = Vec::with_capacity(needed);
        merge_walk(&inputs, |idx, pair| {
            if merged.len() == idx {
                merged.push(Pair {
                    bucket: pair.bucket,
                    count: 0,
                });
            }
            merged[idx].count = merged[idx].count.saturating_add(pair.count);
        });

        self.bvs = merged;
        self.rebuild_fast();
        self.bvs.len()
    }

    /// Removes the samples of every histogram in `sources` from this one.
    ///
    /// Fails if any source holds a bucket this histogram does not, or if a
    /// bucket count would underflow. Counts saturate at zero on failure, so
    /// the histogram remains well formed but partially modified; callers
    /// must treat a failure as invalidating downstream use.
    pub fn subtract(&mut self, sources: &[&Histogram]) -> Result<(), Error> {
        let mut underflow = false;
        for source in sources {
            for pair in &source.bvs {
                match self.find(pair.bucket) {
                    Ok(idx) => {
                        let old = self.bvs[idx].count;
                        if pair.count > old {
                            underflow = true;
                        }
                        self.bvs[idx].count = old.saturating_sub(pair.count);
                    }
                    Err(_) => underflow = true,
                }
            }
        }
        if underflow {
            Err(Error::Underflow)
        } else {
            Ok(())
        }
    }

    /// Adds the counts of `other`, treating counts on both sides as signed
    /// 64-bit integers. Fails on overflow.
    pub fn add_as_int64(&mut self, other: &Histogram) -> Result<(), Error> {
        self.apply_as_int64(other, false)
    }

    /// Subtracts the counts of `other`, treating counts on both sides as
    /// signed 64-bit integers. Fails on overflow.
    pub fn subtract_as_int64(&mut self, other: &Histogram) -> Result<(), Error> {
        self.apply_as_int64(other, true)
    }

    fn apply_as_int64(&mut self, other: &Histogram, negate: bool) -> Result<(), Error> {
        for pair in &other.bvs {
            let idx = match self.find(pair.bucket) {
                Ok(idx) => idx,
                Err(_) => {
                    self.insert_bucket(pair.bucket, 0);
                    match self.find(pair.bucket) {
                        Ok(idx) => idx,
                        // invalid buckets are elided on insert
                        Err(_) => continue,
                    }
                }
            };
            let current = self.bvs[idx].count as i64;
            let rhs = pair.count as i64;
            let new = if negate {
                current.checked_sub(rhs)
            } else {
                current.checked_add(rhs)
            }
            .ok_or(Error::Overflow)?;
            self.bvs[idx].count = new as u64;
        }
        Ok(())
    }

    /// Scales every count by `factor`, rounding to the nearest integer and
    /// clamping to the `u64` range.
    pub fn downsample(&mut self, factor: f64) {
        for pair in &mut self.bvs {
            let scaled = (pair.count as f64 * factor).round();
            pair.count = if scaled <= 0.0 {
                0
            } else if scaled >= u64::MAX as f64 {
                u64::MAX
            } else {
                scaled as u64
            };
        }
    }

    /// Returns a lossily compressed copy: buckets with exponents below
    /// `mbe` (the minimum bucket exponent) merge into the zero bucket, and
    /// buckets at exactly `mbe` are re-bucketed to a single-digit mantissa
    /// (val 10, 20, .. 90). Mean and quantiles of the result will differ;
    /// the intended use is visualization.
    pub fn compress_mbe(&self, mbe: i8) -> Histogram {
        let mut compressed = Histogram::new();
        for pair in &self.bvs {
            // stored finite buckets always have |val| >= 10, so checking
            // the exponent suffices
            let bucket = match pair.bucket {
                Bucket::Finite { exp, .. } if exp < mbe => Bucket::Zero,
                Bucket::Finite { val, exp } if exp == mbe => Bucket::Finite {
                    val: (val / 10) * 10,
                    exp,
                },
                other => other,
            };
            compressed.insert_bucket(bucket, pair.count);
        }
        compressed
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Histogram {
    // Equality is over the recorded data; the fast table is a lookup
    // accelerator, not data.
    fn eq(&self, other: &Self) -> bool {
        self.bvs.len() == other.bvs.len()
            && self
                .bvs
                .iter()
                .zip(other.bvs.iter())
                .all(|(a, b)| a.bucket == b.bucket && a.count == b.count)
    }
}

impl fmt::Debug for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.bvs.iter().map(|pair| (pair.bucket.to_string(), pair.count)))
            .finish()
    }
}

/// An iterator over a histogram's bucket/count pairs in bucket order.
pub struct Iter<'a> {
    inner: core::slice::Iter<'a, Pair>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (Bucket, u64);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|pair| (pair.bucket, pair.count))
    }
}

impl<'a> IntoIterator for &'a Histogram {
    type Item = (Bucket, u64);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// N-way ordered walk over sorted pair slices. Calls `f` with the output
// position and every input pair carrying the smallest not-yet-consumed
// bucket, then advances those inputs together. Returns the number of
// distinct buckets walked.
fn merge_walk(inputs: &[&[Pair]], mut f: impl FnMut(usize, &Pair)) -> usize {
    let mut cursors = vec![0usize; inputs.len()];
    let mut count = 0;
    loop {
        let mut smallest: Option<Bucket> = None;
        for (input, &cursor) in inputs.iter().zip(cursors.iter()) {
            if let Some(pair) = input.get(cursor) {
                if smallest.map_or(true, |b| pair.bucket < b) {
                    smallest = Some(pair.bucket);
                }
            }
        }
        let smallest = match smallest {
            Some(bucket) => bucket,
            None => break,
        };
        for (input, cursor) in inputs.iter().zip(cursors.iter_mut()) {
            if let Some(pair) = input.get(*cursor) {
                if pair.bucket == smallest {
                    f(count, pair);
                    *cursor += 1;
                }
            }
        }
        count += 1;
    }
    count
}
