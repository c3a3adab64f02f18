use parking_lot::Mutex;

/// Size classes, spaced roughly by squares over `[16, 16384]`.
///
/// Chosen so that rounding a request up to its class wastes at most ~25%.
const CLASS_SIZES: [usize; 33] = [
    16, 20, 24, 28, 36, 52, 64, 100, 144, 256, 400, 576, 784, 1024, 1296, 1600, 1936, 2304, 2704,
    3136, 3600, 4096, 4624, 5184, 5776, 6400, 7056, 7744, 9216, 10816, 12544, 14400, 16384,
];

pub const NUM_CLASSES: usize = CLASS_SIZES.len();

/// The most buffers one class will park before dropping returns on the floor.
const MAX_PARKED_PER_CLASS: usize = 1024;

// ----------------------------------------------------------------------------

/// Thread-safe recycler of byte buffers in square-spaced size classes.
///
/// [`BucketPool::rent`] rounds the request up to the smallest class that fits
/// and pops that class's free list; requests beyond the largest class fall
/// through to a plain heap allocation ("nonpooled"). [`BucketPool::give`]
/// classifies the buffer by capacity and pushes it back.
///
/// Each class has its own lock and the critical sections are a single
/// push/pop, so contention between partitions is negligible. The pool never
/// shrinks below what its classes have parked.
///
/// Ownership does what the old `poolIndex` header tag did: a buffer is either
/// rented (caller owns it) or parked (pool owns it), so double-free is
/// unrepresentable.
pub struct BucketPool {
    classes: [Mutex<Vec<Vec<u8>>>; NUM_CLASSES],
}

impl Default for BucketPool {
    fn default() -> Self {
        Self {
            classes: std::array::from_fn(|_| Mutex::new(Vec::new())),
        }
    }
}

impl BucketPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// The class index whose buffers can hold `len` bytes, if any fits.
    #[inline]
    pub fn class_of(len: usize) -> Option<usize> {
        if len > CLASS_SIZES[NUM_CLASSES - 1] {
            return None;
        }
        Some(CLASS_SIZES.partition_point(|&size| size < len))
    }

    /// Rent an empty buffer with capacity for at least `len` bytes.
    pub fn rent(&self, len: usize) -> Vec<u8> {
        let Some(class) = Self::class_of(len) else {
            // Nonpooled: too big for any class.
            return Vec::with_capacity(len);
        };

        if let Some(mut buf) = self.classes[class].lock().pop() {
            buf.clear();
            return buf;
        }
        Vec::with_capacity(CLASS_SIZES[class])
    }

    /// Return a buffer to the pool.
    ///
    /// The buffer is parked in the largest class its capacity can serve;
    /// undersized or nonpooled buffers are simply dropped.
    pub fn give(&self, buf: Vec<u8>) {
        let capacity = buf.capacity();
        if capacity < CLASS_SIZES[0] {
            return;
        }

        // Largest class with size <= capacity.
        let class = CLASS_SIZES.partition_point(|&size| size <= capacity) - 1;
        debug_assert!(CLASS_SIZES[class] <= capacity);

        let mut parked = self.classes[class].lock();
        if parked.len() < MAX_PARKED_PER_CLASS {
            parked.push(buf);
        }
    }

    /// How many buffers are parked in the given class.
    pub fn parked(&self, class: usize) -> usize {
        self.classes[class].lock().len()
    }

    /// Free-list depth per class, for the stats endpoint.
    pub fn depths(&self) -> [usize; NUM_CLASSES] {
        std::array::from_fn(|class| self.parked(class))
    }
}

// ----------------------------------------------------------------------------
