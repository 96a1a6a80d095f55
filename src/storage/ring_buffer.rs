use core::cmp;
use managed::ManagedSlice;

/// A ring buffer.
///
/// Elements go in at the back and come out at the front as slices; the allocated
/// area can also be read at an offset without consuming it. Boundary conditions
/// (empty/full) simply result in short counts.
#[derive(Debug)]
pub struct RingBuffer<'a, T: 'a> {
    storage: ManagedSlice<'a, T>,
    read_at: usize,
    length: usize,
}

impl<'a, T: 'a> RingBuffer<'a, T> {
    /// Create a ring buffer with the given storage.
    pub fn new<S>(storage: S) -> RingBuffer<'a, T>
    where
        S: Into<ManagedSlice<'a, T>>,
    {
        RingBuffer {
            storage: storage.into(),
            read_at: 0,
            length: 0,
        }
    }

    /// Clear the ring buffer.
    pub fn clear(&mut self) {
        self.read_at = 0;
        self.length = 0;
    }

    /// Return the maximum number of elements in the ring buffer.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Return the current number of elements in the ring buffer.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Return the number of elements that can be added to the ring buffer.
    pub fn window(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Return the largest number of elements that can be added to the buffer
    /// without wrapping around.
    fn contiguous_window(&self) -> usize {
        cmp::min(self.window(), self.capacity() - self.get_idx(self.length))
    }

    /// Query whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shorthand for `(self.read + idx) % self.capacity()` with an
    /// additional check to ensure that the capacity is not zero.
    fn get_idx(&self, idx: usize) -> usize {
        let len = self.capacity();
        if len > 0 { (self.read_at + idx) % len } else { 0 }
    }
}

/// This is the "continuous" ring buffer interface: it operates with element slices.
impl<'a, T: 'a> RingBuffer<'a, T> {
    /// Call `f` with the largest contiguous slice of unallocated buffer elements,
    /// and enqueue the amount of elements returned by `f`.
    ///
    /// # Panics
    /// This function panics if the amount of elements returned by `f` is larger
    /// than the size of the slice passed into it.
    fn enqueue_many_with<'b, R, F>(&'b mut self, f: F) -> (usize, R)
    where
        F: FnOnce(&'b mut [T]) -> (usize, R),
    {
        if self.length == 0 {
            // Ring is currently empty. Reset `read_at` to optimize
            // for contiguous space.
            self.read_at = 0;
        }

        let write_at = self.get_idx(self.length);
        let max_size = self.contiguous_window();
        let (size, result) = f(&mut self.storage[write_at..write_at + max_size]);
        assert!(size <= max_size);
        self.length += size;
        (size, result)
    }

    /// Enqueue as many elements from the given slice into the buffer as possible,
    /// and return the amount of elements that could fit.
    #[must_use]
    pub fn enqueue_slice(&mut self, data: &[T]) -> usize
    where
        T: Copy,
    {
        let (size_1, data) = self.enqueue_many_with(|buf| {
            let size = cmp::min(buf.len(), data.len());
            buf[..size].copy_from_slice(&data[..size]);
            (size, &data[size..])
        });
        let (size_2, ()) = self.enqueue_many_with(|buf| {
            let size = cmp::min(buf.len(), data.len());
            buf[..size].copy_from_slice(&data[..size]);
            (size, ())
        });
        size_1 + size_2
    }

    /// Call `f` with the largest contiguous slice of allocated buffer elements,
    /// and dequeue the amount of elements returned by `f`.
    ///
    /// # Panics
    /// This function panics if the amount of elements returned by `f` is larger
    /// than the size of the slice passed into it.
    fn dequeue_many_with<'b, R, F>(&'b mut self, f: F) -> (usize, R)
    where
        F: FnOnce(&'b mut [T]) -> (usize, R),
    {
        let capacity = self.capacity();
        let max_size = cmp::min(self.len(), capacity - self.read_at);
        let (size, result) = f(&mut self.storage[self.read_at..self.read_at + max_size]);
        assert!(size <= max_size);
        self.read_at = if capacity > 0 {
            (self.read_at + size) % capacity
        } else {
            0
        };
        self.length -= size;
        (size, result)
    }

    /// Dequeue as many elements from the buffer into the given slice as possible,
    /// and return the amount of elements that could fit.
    #[must_use]
    pub fn dequeue_slice(&mut self, data: &mut [T]) -> usize
    where
        T: Copy,
    {
        let (size_1, data) = self.dequeue_many_with(|buf| {
            let size = cmp::min(buf.len(), data.len());
            data[..size].copy_from_slice(&buf[..size]);
            (size, &mut data[size..])
        });
        let (size_2, ()) = self.dequeue_many_with(|buf| {
            let size = cmp::min(buf.len(), data.len());
            data[..size].copy_from_slice(&buf[..size]);
            (size, ())
        });
        size_1 + size_2
    }
}

/// This is the "random access" ring buffer interface: it allows to access elements
/// of the buffer that are not adjacent to its head.
impl<'a, T: 'a> RingBuffer<'a, T> {
    /// Read as many elements from allocated buffer elements into the given slice
    /// starting at the given offset past the first allocated element, and return
    /// the amount read.
    #[must_use]
    pub fn read_allocated(&mut self, offset: usize, data: &mut [T]) -> usize
    where
        T: Copy,
    {
        let capacity = self.capacity();
        if capacity == 0 {
            return 0;
        }
        let mut read = 0;
        while read < data.len() && offset + read < self.length {
            let start_at = (self.read_at + offset + read) % capacity;
            let until_end = capacity - start_at;
            let available = self.length - offset - read;
            let size = cmp::min(cmp::min(until_end, available), data.len() - read);
            data[read..read + size].copy_from_slice(&self.storage[start_at..start_at + size]);
            read += size;
        }
        read
    }

    /// Dequeue the given number of allocated buffer elements.
    ///
    /// # Panics
    /// Panics if the number of elements given exceeds the number of allocated elements.
    pub fn dequeue_allocated(&mut self, count: usize) {
        assert!(count <= self.len());

        self.length -= count;
        self.read_at = self.get_idx(count);
    }
}

impl<'a, T: 'a> From<ManagedSlice<'a, T>> for RingBuffer<'a, T> {
    fn from(slice: ManagedSlice<'a, T>) -> RingBuffer<'a, T> {
        RingBuffer::new(slice)
    }
}

impl<'a, T: 'a> From<Vec<T>> for RingBuffer<'a, T> {
    fn from(storage: Vec<T>) -> RingBuffer<'a, T> {
        RingBuffer::new(storage)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_buffer_length_changes() {
        let mut ring = RingBuffer::new(vec![0; 2]);
        assert!(ring.is_empty());
        assert_eq!(ring.len(), 0);
        assert_eq!(ring.capacity(), 2);
        assert_eq!(ring.window(), 2);

        ring.length = 1;
        assert!(!ring.is_empty());
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.capacity(), 2);
        assert_eq!(ring.window(), 1);

        ring.length = 2;
        assert!(!ring.is_empty());
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.capacity(), 2);
        assert_eq!(ring.window(), 0);
    }

    #[test]
    fn test_buffer_enqueue_slice() {
        let mut ring = RingBuffer::new(vec![b'.'; 12]);

        assert_eq!(ring.enqueue_slice(b"abcdefgh"), 8);
        assert_eq!(ring.len(), 8);
        assert_eq!(&ring.storage[..], b"abcdefgh....");

        ring.dequeue_allocated(4);
        assert_eq!(ring.len(), 4);
        assert_eq!(ring.contiguous_window(), 4);

        assert_eq!(ring.enqueue_slice(b"ijklmnop"), 8);
        assert_eq!(ring.window(), 0);
        assert_eq!(&ring.storage[..], b"mnopefghijkl");

        assert_eq!(ring.enqueue_slice(b"q"), 0);
    }

    #[test]
    fn test_buffer_dequeue_slice() {
        let mut ring = RingBuffer::new(vec![b'.'; 12]);

        assert_eq!(ring.enqueue_slice(b"abcdefghijkl"), 12);

        {
            let mut buf = [0; 8];
            assert_eq!(ring.dequeue_slice(&mut buf[..]), 8);
            assert_eq!(&buf[..], b"abcdefgh");
            assert_eq!(ring.len(), 4);
        }

        assert_eq!(ring.enqueue_slice(b"mnop"), 4);
        assert_eq!(&ring.storage[..], b"mnopefghijkl");

        {
            let mut buf = [0; 8];
            assert_eq!(ring.dequeue_slice(&mut buf[..]), 8);
            assert_eq!(&buf[..], b"ijklmnop");
            assert_eq!(ring.len(), 0);
        }
    }

    #[test]
    fn test_buffer_empty_resets_read_position() {
        let mut ring = RingBuffer::new(vec![b'.'; 4]);
        assert_eq!(ring.enqueue_slice(b"abc"), 3);
        ring.dequeue_allocated(3);
        assert_eq!(ring.enqueue_slice(b"wxyz"), 4);
        assert_eq!(&ring.storage[..], b"wxyz");
    }

    #[test]
    fn test_buffer_read_allocated_wraps() {
        let mut ring = RingBuffer::new(vec![b'.'; 8]);
        assert_eq!(ring.enqueue_slice(b"abcdef"), 6);
        ring.dequeue_allocated(4);
        assert_eq!(ring.enqueue_slice(b"ghijkl"), 6);
        assert_eq!(ring.window(), 0);
        assert_eq!(&ring.storage[..], b"ijklefgh");

        let mut data = [0; 8];
        assert_eq!(ring.read_allocated(0, &mut data[..]), 8);
        assert_eq!(&data[..], b"efghijkl");

        let mut data = [0; 3];
        assert_eq!(ring.read_allocated(3, &mut data[..]), 3);
        assert_eq!(&data[..], b"hij");

        let mut data = [0; 8];
        assert_eq!(ring.read_allocated(6, &mut data[..]), 2);
        assert_eq!(&data[..2], b"kl");
        // Reading does not consume.
        assert_eq!(ring.len(), 8);
    }

    #[test]
    fn test_buffer_dequeue_allocated() {
        let mut ring = RingBuffer::new(vec![b'.'; 4]);
        assert_eq!(ring.enqueue_slice(b"abc"), 3);
        ring.dequeue_allocated(2);
        assert_eq!(ring.len(), 1);
        let mut data = [0; 4];
        assert_eq!(ring.read_allocated(0, &mut data[..]), 1);
        assert_eq!(data[0], b'c');
        ring.dequeue_allocated(1);
        assert!(ring.is_empty());
    }

    #[test]
    #[should_panic]
    fn test_buffer_dequeue_allocated_too_many() {
        let mut ring = RingBuffer::new(vec![b'.'; 4]);
        assert_eq!(ring.enqueue_slice(b"ab"), 2);
        ring.dequeue_allocated(3);
    }

    #[test]
    fn test_from_vec() {
        let ring: RingBuffer<u8> = vec![0; 16].into();
        assert_eq!(ring.capacity(), 16);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_zero_capacity() {
        let mut ring: RingBuffer<u8> = RingBuffer::new(vec![]);
        assert!(ring.is_empty());
        assert_eq!(ring.window(), 0);
        assert_eq!(ring.enqueue_slice(b"a"), 0);
        let mut data = [0; 1];
        assert_eq!(ring.read_allocated(0, &mut data), 0);
        assert_eq!(ring.dequeue_slice(&mut data), 0);
    }
}
