use std::{
    alloc::{alloc_zeroed, dealloc, Layout},
    ops::{Deref, DerefMut},
    ptr::NonNull,
    slice::{from_raw_parts, from_raw_parts_mut},
};

/// 零初始化的主存块，对齐到 16 字节。
pub struct Blob {
    ptr: NonNull<u8>,
    len: usize,
}

unsafe impl Send for Blob {}
unsafe impl Sync for Blob {}

impl Blob {
    pub fn new(size: usize) -> Self {
        let ptr = if size == 0 {
            NonNull::dangling()
        } else {
            let layout = layout(size);
            match NonNull::new(unsafe { alloc_zeroed(layout) }) {
                Some(ptr) => ptr,
                None => std::alloc::handle_alloc_error(layout),
            }
        };
        Self { ptr, len: size }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        let mut ans = Self::new(data.len());
        ans.copy_from_slice(data);
        ans
    }
}

impl Drop for Blob {
    #[inline]
    fn drop(&mut self) {
        let &mut Blob { ptr, len } = self;
        if len > 0 {
            unsafe { dealloc(ptr.as_ptr(), layout(len)) }
        }
    }
}

#[inline(always)]
const fn layout(size: usize) -> Layout {
    unsafe { Layout::from_size_align_unchecked(size, 16) }
}

impl Deref for Blob {
    type Target = [u8];
    #[inline]
    fn deref(&self) -> &[u8] {
        unsafe { from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for Blob {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

#[test]
fn test_blob() {
    let empty = Blob::new(0);
    assert!(empty.is_empty());

    let mut blob = Blob::new(12);
    assert!(blob.iter().all(|&b| b == 0));
    assert_eq!(blob.as_ptr() as usize % 16, 0);
    blob[3] = 7;
    assert_eq!(Blob::from_slice(&blob)[3], 7);
}
