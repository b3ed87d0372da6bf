//! Pure-Rust bindings to the operating system's mapping primitives.
//!
//! TODO: wrap strerror_r usefully.
use std::ffi::c_void;
use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::ptr::NonNull;

use crate::error::{Error, Result};

fn page_size_or_die() -> usize {
    let ret = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

    if ret <= 0 {
        panic!("unable to determine page size: errno={}", unsafe {
            *libc::__errno_location()
        });
    }

    ret as usize
}

lazy_static::lazy_static! {
    static ref PAGE_SIZE: usize = page_size_or_die();
}

/// Returns the system page size.
#[inline]
pub fn page_size() -> usize {
    *PAGE_SIZE
}

fn last_errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

/// Attempts to reserve an *address space* region of `size` bytes,
/// without backing it with physical memory.
///
/// The `size` argument must be a multiple of the page size.
pub fn reserve_region(size: usize) -> Result<NonNull<c_void>> {
    assert!(
        size > 0 && (size % page_size()) == 0,
        "Bad region size={} page_size={}",
        size,
        page_size()
    );

    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_NONE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };

    if ptr == libc::MAP_FAILED {
        Err(Error::from_errno(last_errno()))
    } else {
        Ok(NonNull::new(ptr).expect("mmap returned a null non-error pointer"))
    }
}

/// Releases a region of `size` bytes starting at `base`.
///
/// The size argument must be a multiple of the page size.
pub fn release_region(base: NonNull<c_void>, size: usize) -> Result<()> {
    if size == 0 {
        return Ok(());
    }

    assert!(
        (size % page_size()) == 0,
        "Bad region size={} page_size={}",
        size,
        page_size()
    );

    let ret = unsafe { libc::munmap(base.as_ptr(), size) };

    if ret == 0 {
        Ok(())
    } else {
        Err(Error::from_errno(last_errno()))
    }
}

/// Backs a region of `size` bytes starting at `base` with
/// (demand-faulted) anonymous memory.
///
/// The size argument must be a multiple of the page size.
pub fn allocate_region(base: NonNull<c_void>, size: usize) -> Result<()> {
    if size == 0 {
        return Ok(());
    }

    assert!(
        (size % page_size()) == 0,
        "Bad region size={} page_size={}",
        size,
        page_size()
    );

    let ret = unsafe { libc::mprotect(base.as_ptr(), size, libc::PROT_READ | libc::PROT_WRITE) };

    if ret == 0 {
        unsafe { std::ptr::write_bytes(base.as_ptr() as *mut u8, 0, size) };
        Ok(())
    } else {
        Err(Error::from_errno(last_errno()))
    }
}

/// Backs a region of `size` bytes starting at `base` with a shared
/// mapping of `file`, so the kernel may swap it out under pressure.
///
/// The size argument must be a multiple of the page size.
pub fn allocate_file_region(file: File, base: NonNull<c_void>, size: usize) -> Result<()> {
    if size == 0 {
        return Ok(());
    }

    assert!(
        (size % page_size()) == 0,
        "Bad region size={} page_size={}",
        size,
        page_size()
    );

    if let Err(e) = file.set_len(size as u64) {
        return Err(Error::from_errno(e.raw_os_error().unwrap_or(0)));
    }

    let ptr = unsafe {
        libc::mmap(
            base.as_ptr(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED | libc::MAP_FIXED,
            file.as_raw_fd(),
            0,
        )
    };

    if ptr == libc::MAP_FAILED {
        Err(Error::from_errno(last_errno()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size() {
        assert_ne!(page_size(), 0);
        assert!(page_size().is_power_of_two());
    }

    // Simulate a data + metadata allocation workflow: overallocate, trim
    // the slop, and ask for real memory in some of the remaining space.
    #[test]
    fn smoke_test() {
        let region_size = 1usize << 21;
        let mut base = reserve_region(3 * region_size).expect("reserve should succeed");

        assert!(region_size > 3 * page_size());

        // We overallocated `base` by 3x.  Drop the bottom and top
        // `region_size` bytes from the range.
        release_region(base, region_size).expect("should release the bottom slop");
        base = NonNull::new((base.as_ptr() as usize + region_size) as *mut c_void)
            .expect("Should be non-null");

        let top_slop = NonNull::new((base.as_ptr() as usize + region_size) as *mut c_void)
            .expect("Should be non-null");
        release_region(top_slop, region_size).expect("should release the top slop");

        // Conceptually split the region in three ranges: a one-page
        // region at the base, a guard page just after, and the rest.
        let bottom = base;
        let remainder = NonNull::new((base.as_ptr() as usize + 2 * page_size()) as *mut c_void)
            .expect("Should be non-null");

        allocate_region(bottom, page_size()).expect("should allocate bottom");
        allocate_region(remainder, region_size - 2 * page_size())
            .expect("should allocate remainder");

        release_region(base, region_size).expect("should release everything");
    }
}
