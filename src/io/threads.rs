//! Threading infrastructure — double-buffered producer/consumer pipeline.
//!
//! One dedicated producer thread fills sequence packages while the main
//! thread processes the previously filled one; exactly two packages exist
//! and are recycled through a pair of bounded crossbeam channels, so memory
//! residency stays at two batches no matter how fast either side runs.
//!
//! Uses crossbeam scoped threads for natural lifetime management: the
//! producer and the workers can borrow shared state without `Arc`.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use crossbeam::channel;

// ---------------------------------------------------------------------------
// Double-buffered pipeline
// ---------------------------------------------------------------------------

/// Run a two-slot producer/consumer pipeline to completion.
///
/// `fill` runs on a dedicated thread and loads one batch into a package,
/// returning `Ok(false)` at end of input (the package contents are then
/// ignored). `process` runs on the calling thread for every filled package,
/// overlapping with the next `fill`. The first error on either side tears
/// the pipeline down and is returned.
pub fn run_double_buffered<P, F, G>(slot_a: P, slot_b: P, fill: F, mut process: G) -> Result<()>
where
    P: Send,
    F: FnMut(&mut P) -> Result<bool> + Send,
    G: FnMut(&mut P) -> Result<()>,
{
    let (full_tx, full_rx) = channel::bounded::<P>(2);
    let (free_tx, free_rx) = channel::bounded::<P>(2);
    free_tx.send(slot_a).expect("free channel has capacity");
    free_tx.send(slot_b).expect("free channel has capacity");

    crossbeam::scope(|scope| {
        let producer = scope.spawn(move |_| {
            let mut fill = fill;
            while let Ok(mut pkg) = free_rx.recv() {
                match fill(&mut pkg) {
                    Ok(true) => {
                        if full_tx.send(pkg).is_err() {
                            break;
                        }
                    }
                    Ok(false) => break,
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        });

        let mut consumed = Ok(());
        while let Ok(mut pkg) = full_rx.recv() {
            if let Err(e) = process(&mut pkg) {
                consumed = Err(e);
                break;
            }
            if free_tx.send(pkg).is_err() {
                break;
            }
        }
        // Closing the free channel unblocks the producer if it is waiting.
        drop(free_tx);
        let produced = producer.join().expect("producer thread panicked");
        consumed.and(produced)
    })
    .map_err(|e| anyhow::anyhow!("pipeline thread panicked: {e:?}"))?
}

// ---------------------------------------------------------------------------
// Worker pool
// ---------------------------------------------------------------------------

/// Apply `f` to every index in `0..len` using up to `num_workers` scoped
/// threads over contiguous ranges. Falls back to the calling thread for
/// trivial inputs.
pub fn parallel_for(num_workers: usize, len: usize, f: impl Fn(usize) + Sync) {
    let workers = num_workers.max(1).min(len);
    if workers <= 1 {
        for i in 0..len {
            f(i);
        }
        return;
    }
    let chunk = len.div_ceil(workers);
    let f = &f;
    crossbeam::scope(|scope| {
        for w in 0..workers {
            let start = w * chunk;
            let end = ((w + 1) * chunk).min(len);
            if start >= end {
                break;
            }
            scope.spawn(move |_| {
                for i in start..end {
                    f(i);
                }
            });
        }
    })
    .expect("worker thread panicked");
}

// ---------------------------------------------------------------------------
// AtomicBitVector
// ---------------------------------------------------------------------------

/// Fixed-size bit vector with lock-free concurrent `set`.
///
/// Reset between batches by the owning thread; `set`/`get` are safe from any
/// number of workers.
pub struct AtomicBitVector {
    words: Vec<AtomicU64>,
    len: usize,
}

impl AtomicBitVector {
    /// Create an empty bit vector.
    pub fn new() -> Self {
        Self {
            words: Vec::new(),
            len: 0,
        }
    }

    /// Resize to `len` bits, all clear.
    pub fn reset(&mut self, len: usize) {
        let words = len.div_ceil(64);
        self.words.clear();
        self.words.resize_with(words, || AtomicU64::new(0));
        self.len = len;
    }

    /// Number of bits.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the vector holds no bits.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set bit `i`.
    #[inline]
    pub fn set(&self, i: usize) {
        debug_assert!(i < self.len);
        self.words[i / 64].fetch_or(1 << (i % 64), Ordering::Relaxed);
    }

    /// Read bit `i`.
    #[inline]
    pub fn get(&self, i: usize) -> bool {
        debug_assert!(i < self.len);
        (self.words[i / 64].load(Ordering::Relaxed) >> (i % 64)) & 1 == 1
    }
}

impl Default for AtomicBitVector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_double_buffer_sees_every_batch() {
        let batches: Vec<Vec<u32>> = (0..10).map(|i| vec![i; 3]).collect();
        let mut next = 0usize;
        let seen = std::sync::Mutex::new(Vec::new());
        run_double_buffered(
            Vec::new(),
            Vec::new(),
            move |pkg: &mut Vec<u32>| {
                pkg.clear();
                if next >= batches.len() {
                    return Ok(false);
                }
                pkg.extend_from_slice(&batches[next]);
                next += 1;
                Ok(true)
            },
            |pkg| {
                seen.lock().unwrap().push(pkg.clone());
                Ok(())
            },
        )
        .unwrap();
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 10);
        for (i, batch) in seen.iter().enumerate() {
            assert_eq!(batch, &vec![i as u32; 3]);
        }
    }

    #[test]
    fn test_double_buffer_propagates_process_error() {
        let result = run_double_buffered(
            0u32,
            0u32,
            |pkg: &mut u32| {
                *pkg += 1;
                Ok(true)
            },
            |_| anyhow::bail!("boom"),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_double_buffer_propagates_fill_error() {
        let result = run_double_buffered(
            0u32,
            0u32,
            |_: &mut u32| anyhow::bail!("bad input"),
            |_| Ok(()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_parallel_for_covers_all_indices() {
        let hits: Vec<AtomicUsize> = (0..1000).map(|_| AtomicUsize::new(0)).collect();
        parallel_for(7, hits.len(), |i| {
            hits[i].fetch_add(1, Ordering::Relaxed);
        });
        assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));
    }

    #[test]
    fn test_parallel_for_empty_and_single() {
        parallel_for(4, 0, |_| panic!("must not run"));
        let hit = AtomicUsize::new(0);
        parallel_for(4, 1, |_| {
            hit.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(hit.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_atomic_bit_vector() {
        let mut bits = AtomicBitVector::new();
        bits.reset(130);
        assert_eq!(bits.len(), 130);
        bits.set(0);
        bits.set(64);
        bits.set(129);
        assert!(bits.get(0));
        assert!(!bits.get(1));
        assert!(bits.get(64));
        assert!(bits.get(129));
        bits.reset(10);
        assert!(!bits.get(0));
    }

    #[test]
    fn test_atomic_bit_vector_concurrent_set() {
        let mut bits = AtomicBitVector::new();
        bits.reset(256);
        let bits = &bits;
        crossbeam::scope(|scope| {
            for t in 0..4 {
                scope.spawn(move |_| {
                    for i in (t..256).step_by(4) {
                        bits.set(i);
                    }
                });
            }
        })
        .unwrap();
        for i in 0..256 {
            assert!(bits.get(i));
        }
    }
}
