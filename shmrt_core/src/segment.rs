//! Shared memory segment handles and the bounds-checked shared view

use memmap2::MmapMut;
use std::marker::PhantomData;
use std::ptr::NonNull;

/// Process-local handle to a mapped backing object.
///
/// Dropping the handle unmaps it. The backing object itself lives until
/// [`ShmRuntime::destroy_segment`](crate::ShmRuntime::destroy_segment).
pub struct Segment {
    name: String,
    generation: u64,
    size: usize,
    base: NonNull<u8>,
    // Owns the mapping `base` points into; must outlive every view.
    _mmap: MmapMut,
}

// SAFETY: the mapping is process-shared memory; all access goes through
// volatile operations in `SharedView` or through pthread calls, so sharing
// the handle between threads adds nothing beyond what other processes do.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl Segment {
    pub(crate) fn new(name: String, generation: u64, size: usize, mut mmap: MmapMut) -> Self {
        debug_assert!(mmap.len() >= size);
        // MmapMut never hands out a null pointer for a successful mapping.
        let base = NonNull::new(mmap.as_mut_ptr()).unwrap_or(NonNull::dangling());
        Self {
            name,
            generation,
            size,
            base,
            _mmap: mmap,
        }
    }

    /// Logical segment name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Generation of the backing object this handle maps
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Byte view of the whole segment.
    pub fn base(&self) -> SharedView<'_> {
        SharedView {
            base: self.base,
            len: self.size,
            _segment: PhantomData,
        }
    }

    /// Raw pointer to `offset`, for lock state placed inside the segment.
    pub(crate) fn state_ptr(&self, offset: usize) -> *mut u8 {
        debug_assert!(offset < self.size);
        // SAFETY: callers validate offset + state size against self.size.
        unsafe { self.base.as_ptr().add(offset) }
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("name", &self.name)
            .field("generation", &self.generation)
            .field("size", &self.size)
            .finish()
    }
}

/// Bounds-checked access to segment bytes.
///
/// Reads and writes are volatile, so polling loops always observe memory.
/// They carry no ordering of their own: use a [`ShmMutex`](crate::ShmMutex)
/// to order accesses across processes.
///
/// # Panics
///
/// Every accessor panics when the range leaves `[0, len)`, and the typed
/// integer accessors panic when `offset` is not a multiple of the type's
/// size. Both are caller contract violations, exactly like out-of-range
/// slice indexing.
#[derive(Clone, Copy)]
pub struct SharedView<'a> {
    base: NonNull<u8>,
    len: usize,
    _segment: PhantomData<&'a Segment>,
}

macro_rules! typed_access {
    ($($read:ident / $write:ident : $ty:ty),* $(,)?) => {
        $(
            #[doc = concat!("Volatile read of a `", stringify!($ty), "` at `offset`.")]
            pub fn $read(&self, offset: usize) -> $ty {
                let ptr = self.typed_ptr::<$ty>(offset);
                // SAFETY: in bounds and aligned per typed_ptr.
                unsafe { ptr.read_volatile() }
            }

            #[doc = concat!("Volatile write of a `", stringify!($ty), "` at `offset`.")]
            pub fn $write(&self, offset: usize, value: $ty) {
                let ptr = self.typed_ptr::<$ty>(offset);
                // SAFETY: in bounds and aligned per typed_ptr.
                unsafe { ptr.write_volatile(value) }
            }
        )*
    };
}

impl<'a> SharedView<'a> {
    /// Length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the view is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    typed_access! {
        read_u8 / write_u8: u8,
        read_u32 / write_u32: u32,
        read_i32 / write_i32: i32,
        read_u64 / write_u64: u64,
    }

    /// Copy `out.len()` bytes starting at `offset` into `out`.
    pub fn read_into(&self, offset: usize, out: &mut [u8]) {
        let src = self.range_ptr(offset, out.len());
        for (i, byte) in out.iter_mut().enumerate() {
            // SAFETY: i < out.len(), range checked above.
            *byte = unsafe { src.add(i).read_volatile() };
        }
    }

    /// Copy `len` bytes starting at `offset` into a new vector.
    pub fn to_vec(&self, offset: usize, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.read_into(offset, &mut out);
        out
    }

    /// Copy `data` into the segment starting at `offset`.
    pub fn write_from(&self, offset: usize, data: &[u8]) {
        let dst = self.range_ptr(offset, data.len());
        for (i, &byte) in data.iter().enumerate() {
            // SAFETY: i < data.len(), range checked above.
            unsafe { dst.add(i).write_volatile(byte) };
        }
    }

    /// Set `len` bytes starting at `offset` to `value`.
    pub fn fill(&self, offset: usize, len: usize, value: u8) {
        let dst = self.range_ptr(offset, len);
        for i in 0..len {
            // SAFETY: i < len, range checked above.
            unsafe { dst.add(i).write_volatile(value) };
        }
    }

    /// Whether every byte equals `value`.
    pub fn all_eq(&self, value: u8) -> bool {
        (0..self.len).all(|i| self.read_u8(i) == value)
    }

    fn range_ptr(&self, offset: usize, len: usize) -> *mut u8 {
        let in_bounds = offset.checked_add(len).is_some_and(|end| end <= self.len);
        assert!(
            in_bounds,
            "shared view access {offset}+{len} out of range for {}-byte segment",
            self.len
        );
        // SAFETY: offset <= len of the mapping.
        unsafe { self.base.as_ptr().add(offset) }
    }

    fn typed_ptr<T>(&self, offset: usize) -> *mut T {
        let size = core::mem::size_of::<T>();
        assert!(
            offset % size == 0,
            "shared view offset {offset} not aligned to {size}"
        );
        self.range_ptr(offset, size) as *mut T
    }
}
