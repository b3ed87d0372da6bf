//! A `Mapper` is responsible for acquiring address space and backing
//! memory from the operating system. Each `LinearArena` is parameterised
//! on such a `Mapper`.
#[cfg(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
))]
use contracts::*;
#[cfg(not(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts")))]
use disabled_contracts::*;

use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::Mutex;

use crate::error::Result;

pub use crate::constants::GUARD_PAGE_SIZE;

#[allow(clippy::inline_fn_without_body)]
#[contract_trait]
pub trait Mapper: std::fmt::Debug + Sync {
    /// Returns the mapping granularity for this mapper. All calls into
    /// the mapper will align addresses and sizes to that page size.
    ///
    /// The page size must be constant for the lifetime of a process.
    #[ensures(ret > 0 && ret & (ret - 1) == 0, "page size must be a power of 2")]
    #[ensures(ret <= GUARD_PAGE_SIZE, "pages should be smaller than guard ranges")]
    fn page_size(&self) -> usize;

    /// Attempts to reserve a range of address space. On success,
    /// returns the address of the first byte in the reserved range,
    /// and the number of bytes actually reserved. Both values should
    /// be aligned to the `page_size()`.
    #[requires(desired_size % self.page_size() == 0)]
    #[requires(desired_size > 0)]
    #[ensures(ret.is_ok() -> ret.as_ref().unwrap().0.as_ptr() != std::ptr::null_mut(),
              "the mapped range never includes NULL")]
    fn reserve(&self, desired_size: usize) -> Result<(NonNull<c_void>, usize)>;

    /// Releases a page-aligned range that was previously obtained with
    /// a single call to `reserve`.
    #[requires(base.as_ptr() as usize % self.page_size() == 0)]
    #[requires(size % self.page_size() == 0)]
    fn release(&self, base: NonNull<c_void>, size: usize) -> Result<()>;

    /// Prepares a page-aligned range of metadata for read and write
    /// access. On successful return, the range must be zero-filled.
    fn allocate_meta(&self, base: NonNull<c_void>, size: usize) -> Result<()>;

    /// Prepares a page-aligned range of object data for read and
    /// write access. On successful return, the range must be
    /// zero-filled.
    fn allocate_data(&self, base: NonNull<c_void>, size: usize) -> Result<()>;
}

#[derive(Debug)]
struct DefaultMapper {}

lazy_static::lazy_static! {
    static ref NAMED_MAPPERS: Mutex<HashMap<String, &'static dyn Mapper>> = {
        let mut map: HashMap<String, &'static dyn Mapper> = HashMap::new();

        map.insert(
            "file".to_string(),
            Box::leak(Box::new(crate::file_backed_mapper::FileBackedMapper {})) as &'static dyn Mapper,
        );
        Mutex::new(map)
    };
}

/// Upserts the mapper associated with `name`.
pub fn register_mapper(name: String, mapper: &'static dyn Mapper) {
    let mut mappers = NAMED_MAPPERS.lock().unwrap();

    mappers.insert(name, mapper);
}

/// Returns the mapper for the given `name`, if one exists, or the
/// default mapper if `name` is `None`.
///
/// # Errors
///
/// Returns `Err` if no such mapper is defined.
pub fn get_mapper(name: Option<&str>) -> std::result::Result<&'static dyn Mapper, &'static str> {
    lazy_static::lazy_static! {
        static ref DEFAULT_MAPPER: DefaultMapper = DefaultMapper {};
    }

    match name {
        Some(key) => {
            let mappers = NAMED_MAPPERS.lock().unwrap();

            Ok(*mappers.get(key).ok_or("mapper not found")?)
        }
        None => Ok(&*DEFAULT_MAPPER),
    }
}

#[contract_trait]
impl Mapper for DefaultMapper {
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
        crate::map::allocate_region(base, size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mapper_round_trips() {
        let mapper = get_mapper(None).unwrap();
        let (base, size) = mapper.reserve(mapper.page_size()).unwrap();

        mapper.allocate_data(base, size).unwrap();
        mapper.release(base, size).unwrap();
    }

    #[test]
    fn unknown_named_mapper_errors() {
        assert!(get_mapper(Some("does-not-exist")).is_err());
    }

    #[test]
    fn file_mapper_is_registered_by_default() {
        assert!(get_mapper(Some("file")).is_ok());
    }
}
