//! Fixed-size frame pool connecting a camera producer to streaming consumers.
//!
//! The pool owns a small ring of preallocated frame buffers. A producer
//! publishes frames with [`FramePool::submit`]; consumers borrow them with
//! [`FramePool::borrow_latest`] or [`FramePool::borrow_at_or_after`] and
//! receive a [`FrameRef`] guard. A borrowed node is never selected for
//! rewriting, so readers see stable bytes without copying, and the producer
//! never blocks behind a slow reader: when no node is free the frame is
//! dropped.
//!
//! All producer/consumer operations take the pool lock with a bounded wait.
//! A timeout is treated as a transient failure, never a panic or a stall.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// Number of frame nodes a pool holds by default.
pub const DEFAULT_POOL_FRAMES: usize = 5;

/// Bounded wait for the pool lock.
const LOCK_TIMEOUT: Duration = Duration::from_millis(50);

/// Pixel layout of a submitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// Already entropy-coded JPEG (JFIF) bytes.
    Jpeg,
    /// 16-bit RGB, 5-6-5 packing.
    Rgb565,
    /// Packed YUV 4:2:2.
    Yuv422,
    /// 8-bit luminance only.
    Grayscale,
}

/// One preallocated buffer slot.
#[derive(Debug)]
struct FrameNode {
    data: Box<[u8]>,
    /// Valid byte length; 0 means the node has never been filled.
    size: usize,
    /// Capture time in milliseconds on the producer's clock.
    timestamp: u64,
    format: FrameFormat,
}

/// Borrowed read access to one pooled frame.
///
/// While the guard lives, the node it points at cannot be recycled by the
/// producer. Dropping the guard releases the borrow; release cannot be
/// forgotten or performed twice.
#[derive(Debug)]
pub struct FrameRef {
    node: Arc<FrameNode>,
}

impl FrameRef {
    /// The frame bytes.
    pub fn data(&self) -> &[u8] {
        &self.node.data[..self.node.size]
    }

    /// Capture timestamp in milliseconds.
    pub fn timestamp(&self) -> u64 {
        self.node.timestamp
    }

    /// Pixel layout of the frame.
    pub fn format(&self) -> FrameFormat {
        self.node.format
    }

    /// Frame length in bytes.
    pub fn len(&self) -> usize {
        self.node.size
    }

    /// Whether the frame holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.node.size == 0
    }
}

/// Shared handle to a frame pool.
///
/// Cloning is cheap and every clone refers to the same pool, so the
/// producer thread and the server loop can each hold one.
#[derive(Debug, Clone)]
pub struct FramePool {
    nodes: Arc<Mutex<VecDeque<Arc<FrameNode>>>>,
    frame_capacity: usize,
}

impl FramePool {
    /// Allocate a pool of `frames` nodes of `frame_capacity` bytes each.
    ///
    /// All storage is allocated here; `submit` and the borrow operations
    /// never allocate.
    pub fn new(frames: usize, frame_capacity: usize) -> Self {
        let nodes = (0..frames)
            .map(|_| {
                Arc::new(FrameNode {
                    data: vec![0u8; frame_capacity].into_boxed_slice(),
                    size: 0,
                    timestamp: 0,
                    format: FrameFormat::Jpeg,
                })
            })
            .collect();
        tracing::debug!(frames, frame_capacity, "frame pool allocated");
        FramePool {
            nodes: Arc::new(Mutex::new(nodes)),
            frame_capacity,
        }
    }

    /// Pool sized for JPEG frames at the given resolution.
    ///
    /// `width * height / 5` bytes per node is a generous bound for camera
    /// JPEG output at moderate quality settings.
    pub fn for_resolution(width: u16, height: u16) -> Self {
        Self::new(
            DEFAULT_POOL_FRAMES,
            width as usize * height as usize / 5,
        )
    }

    /// Publish a new frame into the pool.
    ///
    /// Recycles the oldest node no reader currently holds and appends it at
    /// the tail, so pool order tracks write order. Returns `false`, dropping
    /// the frame, when `data` exceeds the per-node capacity, when every node
    /// is pinned by a borrower, or when the pool lock cannot be acquired
    /// within the bounded wait.
    pub fn submit(&self, timestamp: u64, format: FrameFormat, data: &[u8]) -> bool {
        if data.len() > self.frame_capacity {
            tracing::warn!(
                size = data.len(),
                capacity = self.frame_capacity,
                "frame exceeds node capacity, dropped"
            );
            return false;
        }

        let Some(mut nodes) = self.nodes.try_lock_for(LOCK_TIMEOUT) else {
            tracing::warn!("pool lock timeout on submit, frame dropped");
            return false;
        };

        // Borrows are taken under this lock, so a node that is unreferenced
        // here stays unreferenced until we are done with it.
        let Some(index) = nodes.iter().position(|n| Arc::strong_count(n) == 1) else {
            tracing::warn!("all frame nodes borrowed, frame dropped");
            return false;
        };

        let Some(mut node) = nodes.remove(index) else {
            return false;
        };
        match Arc::get_mut(&mut node) {
            Some(slot) => {
                slot.data[..data.len()].copy_from_slice(data);
                slot.size = data.len();
                slot.timestamp = timestamp;
                slot.format = format;
                nodes.push_back(node);
                true
            }
            None => {
                // Cannot happen while the lock is held; treat as no free node.
                nodes.push_back(node);
                false
            }
        }
    }

    /// Borrow the first frame in pool order with `timestamp >= since`.
    ///
    /// Walking consumers pass their last-delivered timestamp plus one to
    /// advance through frames without repeating any.
    pub fn borrow_at_or_after(&self, since: u64) -> Option<FrameRef> {
        let nodes = self.nodes.try_lock_for(LOCK_TIMEOUT)?;
        nodes
            .iter()
            .find(|n| n.size > 0 && n.timestamp >= since)
            .map(|n| FrameRef {
                node: Arc::clone(n),
            })
    }

    /// Borrow the most recently written frame.
    pub fn borrow_latest(&self) -> Option<FrameRef> {
        let nodes = self.nodes.try_lock_for(LOCK_TIMEOUT)?;
        nodes
            .iter()
            .rev()
            .find(|n| n.size > 0)
            .map(|n| FrameRef {
                node: Arc::clone(n),
            })
    }

    /// Number of nodes currently holding a readable frame.
    ///
    /// Reports 0 when the pool lock is not acquired within the bounded wait.
    pub fn frames_available(&self) -> usize {
        match self.nodes.try_lock_for(LOCK_TIMEOUT) {
            Some(nodes) => nodes.iter().filter(|n| n.size > 0).count(),
            None => 0,
        }
    }

    /// Timestamps of readable frames in pool order.
    ///
    /// Empty when the pool lock is not acquired within the bounded wait.
    pub fn timestamps(&self) -> Vec<u64> {
        match self.nodes.try_lock_for(LOCK_TIMEOUT) {
            Some(nodes) => nodes
                .iter()
                .filter(|n| n.size > 0)
                .map(|n| n.timestamp)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Per-node byte capacity.
    pub fn frame_capacity(&self) -> usize {
        self.frame_capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn new_pool_has_no_readable_frames() {
        let pool = FramePool::new(3, 64);
        assert_eq!(pool.frames_available(), 0);
        assert!(pool.borrow_latest().is_none());
        assert!(pool.borrow_at_or_after(0).is_none());
    }

    #[test]
    fn pool_retains_most_recent_frames() {
        let pool = FramePool::new(3, 64);
        for ts in 1..=7 {
            assert!(pool.submit(ts, FrameFormat::Jpeg, b"frame"));
        }
        assert_eq!(pool.timestamps(), vec![5, 6, 7]);
        assert_eq!(pool.borrow_latest().unwrap().timestamp(), 7);
    }

    #[test]
    fn borrow_at_or_after_respects_lower_bound() {
        let pool = FramePool::new(3, 64);
        pool.submit(10, FrameFormat::Jpeg, b"a");
        pool.submit(20, FrameFormat::Jpeg, b"b");
        pool.submit(30, FrameFormat::Jpeg, b"c");

        assert_eq!(pool.borrow_at_or_after(15).unwrap().timestamp(), 20);
        assert_eq!(pool.borrow_at_or_after(20).unwrap().timestamp(), 20);
        assert!(pool.borrow_at_or_after(31).is_none());
    }

    #[test]
    fn oversized_frame_is_dropped() {
        let pool = FramePool::new(2, 16);
        assert!(pool.submit(1, FrameFormat::Jpeg, &[0u8; 16]));
        assert!(!pool.submit(2, FrameFormat::Jpeg, &[0u8; 17]));
        assert_eq!(pool.timestamps(), vec![1]);
    }

    #[test]
    fn borrowed_node_is_never_rewritten() {
        let pool = FramePool::new(2, 64);
        pool.submit(1, FrameFormat::Jpeg, b"first");
        pool.submit(2, FrameFormat::Jpeg, b"second");

        let guard = pool.borrow_at_or_after(1).unwrap();
        assert_eq!(guard.timestamp(), 1);

        // Recycles the unborrowed node, then has nowhere left to write.
        assert!(pool.submit(3, FrameFormat::Jpeg, b"third"));
        let other = pool.borrow_latest().unwrap();
        assert!(!pool.submit(4, FrameFormat::Jpeg, b"fourth"));

        assert_eq!(guard.data(), b"first");
        assert_eq!(guard.timestamp(), 1);

        drop(other);
        drop(guard);
        assert!(pool.submit(5, FrameFormat::Jpeg, b"fifth"));
    }

    #[test]
    fn guard_keeps_bytes_stable_across_recycling() {
        let pool = FramePool::new(3, 64);
        pool.submit(1, FrameFormat::Jpeg, b"pinned");
        let guard = pool.borrow_at_or_after(0).unwrap();

        for ts in 2..20 {
            pool.submit(ts, FrameFormat::Jpeg, b"churn");
        }
        assert_eq!(guard.data(), b"pinned");
    }

    #[test]
    fn stale_borrowed_head_survives_recycling() {
        let pool = FramePool::new(3, 64);
        pool.submit(1, FrameFormat::Jpeg, b"a");
        pool.submit(2, FrameFormat::Jpeg, b"b");
        pool.submit(3, FrameFormat::Jpeg, b"c");

        // Pin the oldest frame; recycling must pass over it.
        let guard = pool.borrow_at_or_after(0).unwrap();
        assert_eq!(guard.timestamp(), 1);

        assert!(pool.submit(4, FrameFormat::Jpeg, b"d"));
        assert_eq!(pool.timestamps(), vec![1, 3, 4]);

        drop(guard);
        assert!(pool.submit(5, FrameFormat::Jpeg, b"e"));
        assert_eq!(pool.timestamps(), vec![3, 4, 5]);
    }

    #[test]
    fn non_monotonic_timestamps_break_pool_order() {
        // Pool order is write order, not timestamp order. A producer that
        // submits out-of-order timestamps gets out-of-order scans back.
        let pool = FramePool::new(2, 64);
        pool.submit(100, FrameFormat::Jpeg, b"late");
        pool.submit(50, FrameFormat::Jpeg, b"early");

        assert_eq!(pool.timestamps(), vec![100, 50]);
        assert_eq!(pool.borrow_at_or_after(0).unwrap().timestamp(), 100);
    }

    #[test]
    fn format_and_length_travel_with_the_frame() {
        let pool = FramePool::new(2, 64);
        pool.submit(7, FrameFormat::Grayscale, b"xyz");
        let frame = pool.borrow_latest().unwrap();
        assert_eq!(frame.format(), FrameFormat::Grayscale);
        assert_eq!(frame.len(), 3);
        assert!(!frame.is_empty());
    }

    #[test]
    fn for_resolution_sizes_nodes_from_dimensions() {
        let pool = FramePool::for_resolution(640, 480);
        assert_eq!(pool.frame_capacity(), 640 * 480 / 5);
    }

    #[test]
    fn observers_stay_consistent_under_churn() {
        let pool = FramePool::new(3, 16);
        let producer = {
            let pool = pool.clone();
            thread::spawn(move || {
                for ts in 1..=300u64 {
                    pool.submit(ts, FrameFormat::Jpeg, &ts.to_be_bytes());
                }
            })
        };

        // Either a consistent snapshot or the degraded lock-timeout answer;
        // never a stall or an out-of-order view.
        for _ in 0..300 {
            assert!(pool.frames_available() <= 3);
            let stamps = pool.timestamps();
            assert!(stamps.len() <= 3);
            assert!(stamps.windows(2).all(|w| w[0] < w[1]));
            thread::yield_now();
        }

        producer.join().unwrap();
        assert_eq!(pool.frames_available(), 3);
        assert_eq!(pool.timestamps(), vec![298, 299, 300]);
    }

    #[test]
    fn concurrent_producer_and_readers() {
        let pool = FramePool::new(5, 16);
        let producer = {
            let pool = pool.clone();
            thread::spawn(move || {
                for ts in 1..=200u64 {
                    while !pool.submit(ts, FrameFormat::Jpeg, &ts.to_be_bytes()) {
                        thread::yield_now();
                    }
                    thread::sleep(Duration::from_micros(200));
                }
            })
        };

        let readers: Vec<_> = (0..2)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || {
                    let mut last = 0u64;
                    let deadline = Instant::now() + Duration::from_secs(10);
                    while last < 200 && Instant::now() < deadline {
                        if let Some(frame) = pool.borrow_at_or_after(last + 1) {
                            assert!(frame.timestamp() > last);
                            assert_eq!(frame.data(), frame.timestamp().to_be_bytes());
                            last = frame.timestamp();
                        }
                        thread::yield_now();
                    }
                    last
                })
            })
            .collect();

        producer.join().unwrap();
        for reader in readers {
            assert_eq!(reader.join().unwrap(), 200);
        }
    }
}
