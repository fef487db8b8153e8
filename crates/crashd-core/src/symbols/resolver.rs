//! # Object Resolver
//!
//! Maps memory regions of a crashed process to the binary objects backing
//! them, and caches every object it parses.
//!
//! ## Region naming
//!
//! Region names carry the backing object as a prefix: `libc.so: .text`,
//! `/usr/bin/app:401000-402000`. Names without the `:` delimiter belong to no
//! object (stack, heap). The dynamic loader is recognised by a configurable
//! marker so its frames can be hidden.
//!
//! ## Caching
//!
//! The cache is keyed by resolved path and lives as long as the resolver.
//! A hit never touches the filesystem. A failed load is never cached, so an
//! object that appears later is picked up on the next crash.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::object::LoadedObject;
use crate::types::{MemoryRegion, REGION_NAME_DELIMITER};

/// Substring identifying the dynamic loader's regions.
pub const DEFAULT_LOADER_MARKER: &str = "Loader.so";

/// Where bare shared-library names are looked up.
pub const DEFAULT_LIBRARY_DIR: &str = "/usr/lib";

/// Extract the object name from a region name.
///
/// - Any name containing `loader_marker` yields the marker itself.
/// - Names without `:` are anonymous and yield `None`.
/// - Otherwise the text before the first `:` is the object name.
///
/// ```rust
/// use crashd_core::symbols::object_name_for_region;
///
/// assert_eq!(object_name_for_region("libc.so: .text", "Loader.so").as_deref(), Some("libc.so"));
/// assert_eq!(object_name_for_region("Loader.so: .text", "Loader.so").as_deref(), Some("Loader.so"));
/// assert_eq!(object_name_for_region("stack", "Loader.so"), None);
/// ```
pub fn object_name_for_region(region_name: &str, loader_marker: &str) -> Option<String>
{
    if !loader_marker.is_empty() && region_name.contains(loader_marker) {
        return Some(loader_marker.to_string());
    }
    let (object, _) = region_name.split_once(REGION_NAME_DELIMITER)?;
    Some(object.to_string())
}

/// Counters describing how often the cache had to do real work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats
{
    /// Lookups served from the cache
    pub hits: u64,
    /// Objects parsed and inserted
    pub loads: u64,
    /// Objects that were missing or failed to parse
    pub failures: u64,
}

/// Region-to-object resolver owning the object cache.
#[derive(Debug)]
pub struct ObjectResolver
{
    library_dir: PathBuf,
    loader_marker: String,
    cache: HashMap<PathBuf, Arc<LoadedObject>>,
    stats: CacheStats,
}

impl Default for ObjectResolver
{
    fn default() -> Self
    {
        Self::new(DEFAULT_LIBRARY_DIR, DEFAULT_LOADER_MARKER)
    }
}

impl ObjectResolver
{
    pub fn new(library_dir: impl Into<PathBuf>, loader_marker: impl Into<String>) -> Self
    {
        Self {
            library_dir: library_dir.into(),
            loader_marker: loader_marker.into(),
            cache: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    /// Object name backing `region`, if any.
    pub fn object_name(&self, region: &MemoryRegion) -> Option<String>
    {
        object_name_for_region(&region.name, &self.loader_marker)
    }

    /// Whether `object_name` is the dynamic loader.
    pub fn is_loader(&self, object_name: &str) -> bool
    {
        object_name == self.loader_marker
    }

    /// Filesystem path for an object name.
    ///
    /// Absolute names are used as-is. Names containing `.so` are shared
    /// libraries and live in the library directory. Anything else is taken
    /// as a path.
    pub fn path_for_object(&self, object_name: &str) -> PathBuf
    {
        let name = Path::new(object_name);
        if name.is_absolute() {
            name.to_path_buf()
        } else if object_name.contains(".so") {
            self.library_dir.join(name)
        } else {
            name.to_path_buf()
        }
    }

    /// Loaded object backing `region`.
    ///
    /// Returns `None` for anonymous regions and for objects that are missing
    /// or unparsable; the caller prints `???` for those frames.
    pub fn resolve(&mut self, region: &MemoryRegion) -> Option<Arc<LoadedObject>>
    {
        let name = self.object_name(region)?;
        let path = self.path_for_object(&name);
        self.load(&path)
    }

    /// Loaded object at `path`, parsing it on first use.
    pub fn load(&mut self, path: &Path) -> Option<Arc<LoadedObject>>
    {
        if let Some(object) = self.cache.get(path) {
            self.stats.hits += 1;
            return Some(Arc::clone(object));
        }

        if !path.exists() {
            debug!(path = %path.display(), "object not found");
            self.stats.failures += 1;
            return None;
        }

        match LoadedObject::load(path) {
            Ok(object) => {
                debug!(
                    path = %path.display(),
                    mapped_bytes = object.image_len(),
                    cached = self.cache.len() + 1,
                    "caching object"
                );
                #[allow(clippy::arc_with_non_send_sync)]
                let object = Arc::new(object);
                self.cache.insert(path.to_path_buf(), Arc::clone(&object));
                self.stats.loads += 1;
                Some(object)
            }
            Err(err) => {
                warn!(error = %err, "failed to load object");
                self.stats.failures += 1;
                None
            }
        }
    }

    /// Drop cached objects whose file changed or disappeared since loading.
    ///
    /// Returns the number of evicted entries.
    pub fn evict_stale(&mut self) -> usize
    {
        let before = self.cache.len();
        self.cache.retain(|path, object| {
            let current = fs::metadata(path).and_then(|meta| meta.modified()).ok();
            let fresh = current.is_some() && current == object.mtime();
            if !fresh {
                debug!(path = %path.display(), "evicting stale object");
            }
            fresh
        });

        let evicted = before - self.cache.len();
        if evicted > 0 {
            info!(evicted, "evicted stale objects from cache");
        }
        evicted
    }

    pub fn stats(&self) -> CacheStats
    {
        self.stats
    }

    /// Number of objects currently cached.
    pub fn cached_objects(&self) -> usize
    {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests
{
    use std::fs::File;
    use std::time::Duration;

    use super::*;
    use crate::types::{Address, RegionId};

    fn region(name: &str) -> MemoryRegion
    {
        MemoryRegion::new(RegionId(0), name, Address::from(0x1000), Address::from(0x2000))
    }

    /// Copy of the running test binary, a real ELF object we are free to touch.
    fn scratch_object(dir: &Path) -> PathBuf
    {
        let path = dir.join("app");
        fs::copy(std::env::current_exe().unwrap(), &path).unwrap();
        path
    }

    /// Move the file's mtime forward without changing its contents.
    fn touch(path: &Path)
    {
        let modified = fs::metadata(path).unwrap().modified().unwrap();
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(modified + Duration::from_secs(10))
            .unwrap();
    }

    #[test]
    fn test_object_name_for_region()
    {
        assert_eq!(object_name_for_region("libc.so: .text", "Loader.so").as_deref(), Some("libc.so"));
        assert_eq!(object_name_for_region("main:200-300", "Loader.so").as_deref(), Some("main"));
        assert_eq!(
            object_name_for_region("/usr/lib/Loader.so: .text", "Loader.so").as_deref(),
            Some("Loader.so")
        );
        // The marker wins even without a delimiter.
        assert_eq!(object_name_for_region("Loader.so", "Loader.so").as_deref(), Some("Loader.so"));
        assert_eq!(object_name_for_region("[anonymous]", "Loader.so"), None);
        assert_eq!(object_name_for_region(":weird", "Loader.so").as_deref(), Some(""));
        assert_eq!(object_name_for_region("stack", ""), None);
    }

    #[test]
    fn test_path_for_object()
    {
        let resolver = ObjectResolver::new("/opt/lib", DEFAULT_LOADER_MARKER);

        assert_eq!(resolver.path_for_object("libfoo.so"), PathBuf::from("/opt/lib/libfoo.so"));
        assert_eq!(resolver.path_for_object("libc.so.6"), PathBuf::from("/opt/lib/libc.so.6"));
        assert_eq!(resolver.path_for_object("/usr/bin/app"), PathBuf::from("/usr/bin/app"));
        assert_eq!(resolver.path_for_object("/lib/libm.so"), PathBuf::from("/lib/libm.so"));
        assert_eq!(resolver.path_for_object("app"), PathBuf::from("app"));
    }

    #[test]
    fn test_missing_object_is_not_cached()
    {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = ObjectResolver::new(dir.path(), DEFAULT_LOADER_MARKER);

        assert!(resolver.resolve(&region("libmissing.so: .text")).is_none());
        assert!(resolver.resolve(&region("libmissing.so: .text")).is_none());
        assert_eq!(resolver.cached_objects(), 0);
        assert_eq!(
            resolver.stats(),
            CacheStats {
                hits: 0,
                loads: 0,
                failures: 2,
            }
        );
    }

    #[test]
    fn test_anonymous_region_does_no_work()
    {
        let mut resolver = ObjectResolver::default();
        assert!(resolver.resolve(&region("stack")).is_none());
        assert_eq!(resolver.stats(), CacheStats::default());
    }

    #[test]
    fn test_evict_stale_drops_only_changed_objects()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = scratch_object(dir.path());
        let mut resolver = ObjectResolver::default();

        let first = resolver.load(&path).unwrap();
        assert_eq!(resolver.evict_stale(), 0);
        assert!(Arc::ptr_eq(&first, &resolver.load(&path).unwrap()));

        touch(&path);
        assert_eq!(resolver.evict_stale(), 1);
        assert_eq!(resolver.cached_objects(), 0);

        let reloaded = resolver.load(&path).unwrap();
        assert!(!Arc::ptr_eq(&first, &reloaded));
        assert_eq!(
            resolver.stats(),
            CacheStats {
                hits: 1,
                loads: 2,
                failures: 0,
            }
        );
    }

    #[test]
    fn test_evict_stale_drops_deleted_objects()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = scratch_object(dir.path());
        let mut resolver = ObjectResolver::default();

        assert!(resolver.load(&path).is_some());
        fs::remove_file(&path).unwrap();
        assert_eq!(resolver.evict_stale(), 1);
        assert!(resolver.load(&path).is_none());
    }

    #[test]
    fn test_unparsable_object_is_not_cached()
    {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("libjunk.so"), b"\x7fELF but not really").unwrap();
        let mut resolver = ObjectResolver::new(dir.path(), DEFAULT_LOADER_MARKER);

        assert!(resolver.resolve(&region("libjunk.so: .text")).is_none());
        assert_eq!(resolver.cached_objects(), 0);
        assert_eq!(resolver.stats().failures, 1);
    }
}
