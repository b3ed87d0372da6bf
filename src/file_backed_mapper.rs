//! The file-backed mapper ensures objects are allocated in private
//! temporary-file mappings. This lets the operating system eagerly
//! swap out cold data under memory pressure, and gives the crate's own
//! test suite deterministic, easily-bounded address-space usage
//! instead of relying on anonymous mmaps alone.
#[cfg(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
))]
use contracts::*;
#[cfg(not(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts")))]
use disabled_contracts::*;

use std::ffi::c_void;
use std::fs::File;
use std::path::PathBuf;
use std::ptr::NonNull;
use std::sync::Mutex;

use crate::error::Result;
use crate::mapper::Mapper;

#[derive(Debug)]
pub struct FileBackedMapper {}

lazy_static::lazy_static! {
    static ref FILE_BACKED_PATH: Mutex<Option<PathBuf>> = Default::default();
}

/// Updates the parent directory for the file-backed mapper's temporary
/// files to `path`.
pub fn set_file_backed_slab_directory(path: Option<PathBuf>) {
    let mut global_path = FILE_BACKED_PATH.lock().unwrap();

    *global_path = path;
}

fn get_temp_file() -> std::io::Result<File> {
    let path = FILE_BACKED_PATH.lock().unwrap();

    match &*path {
        Some(dir) => tempfile::tempfile_in(dir),
        None => tempfile::tempfile(),
    }
}

#[contract_trait]
impl Mapper for FileBackedMapper {
    fn page_size(&self) -> usize {
        crate::map::page_size()
    }

    fn reserve(&self, desired_size: usize) -> Result<(NonNull<c_void>, usize)> {
        let region: NonNull<c_void> = crate::map::reserve_region(desired_size)?;
        Ok((region, desired_size))
    }

    fn release(&self, base: NonNull<c_void>, size: usize) -> Result<()> {
        crate::map::release_region(base, size)
    }

    fn allocate_meta(&self, base: NonNull<c_void>, size: usize) -> Result<()> {
        crate::map::allocate_region(base, size)
    }

    fn allocate_data(&self, base: NonNull<c_void>, size: usize) -> Result<()> {
        let tempfile =
            get_temp_file().map_err(|e| crate::error::Error::from_errno(e.raw_os_error().unwrap_or(0)))?;

        crate::map::allocate_file_region(tempfile, base, size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_and_release() {
        let mapper = FileBackedMapper {};
        let (base, size) = mapper.reserve(mapper.page_size()).unwrap();

        mapper.allocate_data(base, size).unwrap();
        mapper.release(base, size).unwrap();
    }
}
