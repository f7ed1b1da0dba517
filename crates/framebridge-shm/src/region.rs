use std::ffi::{CStr, CString};
use std::fs::File;
use std::io::{self, ErrorKind};
use std::os::fd::{AsRawFd, FromRawFd};
use std::os::unix::fs::MetadataExt;
use std::ptr::{self, NonNull};
use std::sync::atomic::AtomicU64;

use framebridge_transport::{RetryError, RetryPolicy};
use tracing::{debug, info, warn};

use crate::error::{Result, ShmError};

/// Longest accepted object name, leading slash included.
#[cfg(target_os = "macos")]
const MAX_NAME_LEN: usize = 31;
#[cfg(not(target_os = "macos"))]
const MAX_NAME_LEN: usize = 255;

/// Permission mode for created regions.
const REGION_MODE: libc::c_uint = 0o600;

/// Who is responsible for removing the region's name from the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Created the region; unlinks it on destroy or drop.
    Owner,
    /// Opened an existing region; only unmaps it.
    Attacher,
}

/// A named POSIX shared memory object mapped read-write into this process.
///
/// Only the owner unlinks the name, and only while the name still refers to
/// the object it created (same device and inode). An attacher never removes
/// the segment, so a consumer shutting down cannot pull it out from under a
/// live producer.
#[derive(Debug)]
pub struct SharedRegion {
    name: String,
    ptr: NonNull<u8>,
    len: usize,
    role: Role,
    identity: (u64, u64),
    released: bool,
}

// SAFETY: the mapping is valid process-wide, not tied to the thread that
// created it. Writes require `&mut self`; concurrent access from other
// processes is coordinated by the channel layouts built on top.
unsafe impl Send for SharedRegion {}
// SAFETY: `&self` methods only read the mapping or hand out atomics.
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Create a new region of exactly `len` zeroed bytes.
    ///
    /// Fails with [`ShmError::AlreadyExists`] if the name is taken.
    pub fn create(name: &str, len: usize) -> Result<Self> {
        let (name, cname) = normalize_name(name)?;
        if len == 0 {
            return Err(ShmError::RegionTooSmall {
                name,
                len: 0,
                required: 1,
            });
        }

        let file = shm_open(&cname, libc::O_CREAT | libc::O_EXCL | libc::O_RDWR).map_err(
            |err| match err.kind() {
                ErrorKind::AlreadyExists => ShmError::AlreadyExists { name: name.clone() },
                _ => os_error("shm_open", &name, err),
            },
        )?;

        let sized = file
            .set_len(len as u64)
            .map_err(|err| os_error("ftruncate", &name, err))
            .and_then(|()| file.metadata().map_err(|err| os_error("fstat", &name, err)))
            .and_then(|metadata| {
                let ptr = map(&file, len).map_err(|err| os_error("mmap", &name, err))?;
                Ok((ptr, (metadata.dev(), metadata.ino())))
            });
        let (ptr, identity) = match sized {
            Ok(mapped) => mapped,
            Err(err) => {
                // SAFETY: `cname` is a valid NUL-terminated object name.
                unsafe { libc::shm_unlink(cname.as_ptr()) };
                return Err(err);
            }
        };

        info!(name = %name, len, "created shared memory region");
        Ok(Self {
            name,
            ptr,
            len,
            role: Role::Owner,
            identity,
            released: false,
        })
    }

    /// Create a region, replacing any existing object with the same name.
    ///
    /// A stale name left by a crashed owner is unlinked and created again.
    /// If a previous owner is still running it keeps its now-orphaned
    /// mapping and no longer shares memory with new attachers.
    pub fn create_or_replace(name: &str, len: usize) -> Result<Self> {
        match Self::create(name, len) {
            Err(ShmError::AlreadyExists { name }) => {
                warn!(
                    name = %name,
                    "shared memory region already exists; replacing it"
                );
                Self::unlink(&name)?;
                Self::create(&name, len)
            }
            other => other,
        }
    }

    /// Open an existing region that is at least `min_len` bytes long.
    pub fn open(name: &str, min_len: usize) -> Result<Self> {
        let (name, cname) = normalize_name(name)?;
        let file = shm_open(&cname, libc::O_RDWR).map_err(|err| match err.kind() {
            ErrorKind::NotFound => ShmError::NotFound { name: name.clone() },
            _ => os_error("shm_open", &name, err),
        })?;

        let metadata = file
            .metadata()
            .map_err(|err| os_error("fstat", &name, err))?;
        let len = usize::try_from(metadata.len()).unwrap_or(usize::MAX);
        if len < min_len.max(1) {
            return Err(ShmError::RegionTooSmall {
                name,
                len,
                required: min_len.max(1),
            });
        }

        let ptr = map(&file, len).map_err(|err| os_error("mmap", &name, err))?;
        debug!(name = %name, len, "attached to shared memory region");
        Ok(Self {
            name,
            ptr,
            len,
            role: Role::Attacher,
            identity: (metadata.dev(), metadata.ino()),
            released: false,
        })
    }

    /// Open a region, waiting for its owner with a bounded retry loop.
    ///
    /// Only "not created yet" failures are retried; anything else is
    /// returned on the first attempt.
    pub fn open_with_retry(name: &str, min_len: usize, policy: &RetryPolicy) -> Result<Self> {
        policy
            .run(name, ShmError::is_not_ready, |_| Self::open(name, min_len))
            .map_err(|err| match err {
                RetryError::Exhausted { attempts, last } => {
                    debug!(error = %last, "last attach attempt");
                    ShmError::RetriesExhausted {
                        name: name.to_string(),
                        attempts,
                    }
                }
                RetryError::Fatal { error, .. } => error,
            })
    }

    /// Remove `name` from the system. Returns `false` if it did not exist.
    ///
    /// Existing mappings stay valid; only the name goes away.
    pub fn unlink(name: &str) -> Result<bool> {
        let (name, cname) = normalize_name(name)?;
        // SAFETY: `cname` is a valid NUL-terminated object name.
        if unsafe { libc::shm_unlink(cname.as_ptr()) } == 0 {
            info!(name = %name, "unlinked shared memory region");
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == ErrorKind::NotFound {
            Ok(false)
        } else {
            Err(os_error("shm_unlink", &name, err))
        }
    }

    /// Unmap the region and, for the owner, unlink its name.
    pub fn destroy(mut self) -> Result<()> {
        self.release()
    }

    /// Normalized name (always starts with `/`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mapped length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false for a mapped region.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_owner(&self) -> bool {
        self.role == Role::Owner
    }

    /// Copy `dst.len()` bytes starting at `offset` out of the region.
    pub(crate) fn read_bytes(&self, offset: usize, dst: &mut [u8]) {
        self.check_range(offset, dst.len());
        // SAFETY: the range is inside the mapping and `dst` is a distinct
        // local buffer.
        unsafe {
            ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), dst.as_mut_ptr(), dst.len());
        }
    }

    /// Copy `src` into the region starting at `offset`.
    pub(crate) fn write_bytes(&mut self, offset: usize, src: &[u8]) {
        self.check_range(offset, src.len());
        // SAFETY: the range is inside the mapping and `src` never aliases it
        // (callers pass local or heap buffers).
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.as_ptr().add(offset), src.len());
        }
    }

    pub(crate) fn read_u64(&self, offset: usize) -> u64 {
        let mut word = [0u8; 8];
        self.read_bytes(offset, &mut word);
        u64::from_le_bytes(word)
    }

    pub(crate) fn write_u64(&mut self, offset: usize, value: u64) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    /// The 8-byte word at `offset` as an atomic counter.
    pub(crate) fn atomic_u64(&self, offset: usize) -> &AtomicU64 {
        self.check_range(offset, 8);
        assert!(offset % 8 == 0, "atomic offset must be 8-byte aligned");
        // SAFETY: the mapping is page aligned, so an 8-aligned offset yields
        // an aligned, in-bounds u64 that lives as long as `self`.
        unsafe { AtomicU64::from_ptr(self.ptr.as_ptr().add(offset).cast::<u64>()) }
    }

    fn check_range(&self, offset: usize, len: usize) {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.len),
            "range {offset}+{len} outside region of {} bytes",
            self.len
        );
    }

    /// Does the name still refer to the object this handle mapped?
    fn name_refers_to_self(&self) -> io::Result<bool> {
        let cname = CString::new(self.name.as_str())
            .map_err(|_| io::Error::from(ErrorKind::InvalidInput))?;
        let metadata = shm_open(&cname, libc::O_RDONLY)?.metadata()?;
        Ok((metadata.dev(), metadata.ino()) == self.identity)
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let unlinked = if self.role == Role::Owner {
            self.unlink_if_still_ours()
        } else {
            Ok(())
        };

        // SAFETY: `ptr` and `len` come from a successful mmap and the
        // `released` flag guarantees a single munmap.
        if unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) } != 0 {
            return Err(os_error(
                "munmap",
                &self.name,
                io::Error::last_os_error(),
            ));
        }
        debug!(name = %self.name, role = ?self.role, "released shared memory region");
        unlinked
    }

    fn unlink_if_still_ours(&self) -> Result<()> {
        match self.name_refers_to_self() {
            Ok(true) => Self::unlink(&self.name).map(|_| ()),
            Ok(false) => {
                warn!(
                    name = %self.name,
                    "region name now refers to another object; leaving it in place"
                );
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(name = %self.name, "region already unlinked");
                Ok(())
            }
            Err(err) => Err(os_error("shm_open", &self.name, err)),
        }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!(name = %self.name, error = %err, "failed to release shared memory region");
        }
    }
}

/// Normalize to a single leading `/` and reject names the OS would refuse.
fn normalize_name(name: &str) -> Result<(String, CString)> {
    let invalid = |reason| ShmError::InvalidName {
        name: name.to_string(),
        reason,
    };

    let bare = name.trim_start_matches('/');
    if bare.is_empty() {
        return Err(invalid("empty name"));
    }
    if bare.contains('/') {
        return Err(invalid("name must not contain '/' after the first character"));
    }

    let normalized = format!("/{bare}");
    if normalized.len() > MAX_NAME_LEN {
        return Err(invalid("name too long"));
    }
    let cname = CString::new(normalized.as_str()).map_err(|_| invalid("name contains NUL"))?;
    Ok((normalized, cname))
}

fn shm_open(name: &CStr, oflag: libc::c_int) -> io::Result<File> {
    // SAFETY: `name` is a valid NUL-terminated string for the duration of
    // the call.
    let fd = unsafe { libc::shm_open(name.as_ptr(), oflag, REGION_MODE) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `fd` was just returned by shm_open and is owned by nobody else.
    Ok(unsafe { File::from_raw_fd(fd) })
}

fn map(file: &File, len: usize) -> io::Result<NonNull<u8>> {
    // SAFETY: the descriptor is open for the duration of the call and
    // `len` is non-zero. The mapping outlives the descriptor.
    let addr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            file.as_raw_fd(),
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    NonNull::new(addr.cast::<u8>()).ok_or_else(|| io::Error::other("mmap returned null"))
}

fn os_error(op: &'static str, name: &str, source: io::Error) -> ShmError {
    ShmError::Os {
        op,
        name: name.to_string(),
        source,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, Instant};

    use super::*;

    /// A short, unique object name (macOS caps names at 31 bytes).
    pub(crate) fn unique_name(tag: &str) -> String {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("/fb{tag}-{}-{n}", std::process::id())
    }

    #[test]
    fn create_write_open_read() {
        let name = unique_name("rg");
        let mut owner = SharedRegion::create(&name, 64).unwrap();
        assert_eq!(owner.role(), Role::Owner);
        assert_eq!(owner.len(), 64);
        owner.write_u64(8, 0xDEAD_BEEF);

        let attacher = SharedRegion::open(&name, 64).unwrap();
        assert_eq!(attacher.role(), Role::Attacher);
        assert_eq!(attacher.read_u64(8), 0xDEAD_BEEF);
        assert_eq!(attacher.read_u64(0), 0, "new regions are zero-filled");
    }

    #[test]
    fn create_existing_name_fails() {
        let name = unique_name("ex");
        let _owner = SharedRegion::create(&name, 16).unwrap();
        let err = SharedRegion::create(&name, 16).unwrap_err();
        assert!(matches!(err, ShmError::AlreadyExists { .. }));
    }

    #[test]
    fn open_missing_name_is_not_found() {
        let err = SharedRegion::open(&unique_name("nf"), 16).unwrap_err();
        assert!(matches!(err, ShmError::NotFound { .. }));
        assert!(err.is_not_ready());
    }

    #[test]
    fn open_rejects_short_region() {
        let name = unique_name("sm");
        let _owner = SharedRegion::create(&name, 16).unwrap();
        let err = SharedRegion::open(&name, 32).unwrap_err();
        assert!(matches!(
            err,
            ShmError::RegionTooSmall {
                len: 16,
                required: 32,
                ..
            }
        ));
    }

    #[test]
    fn names_are_normalized_and_validated() {
        let bare = unique_name("nm");
        let owner = SharedRegion::create(bare.trim_start_matches('/'), 8).unwrap();
        assert_eq!(owner.name(), bare);

        for bad in ["", "/", "a/b", "/x\0y"] {
            assert!(matches!(
                SharedRegion::create(bad, 8),
                Err(ShmError::InvalidName { .. })
            ));
        }
        let long = format!("/{}", "n".repeat(300));
        assert!(matches!(
            SharedRegion::create(&long, 8),
            Err(ShmError::InvalidName { .. })
        ));
    }

    #[test]
    fn owner_drop_unlinks() {
        let name = unique_name("od");
        let owner = SharedRegion::create(&name, 8).unwrap();
        drop(owner);
        assert!(matches!(
            SharedRegion::open(&name, 8),
            Err(ShmError::NotFound { .. })
        ));
    }

    #[test]
    fn attacher_destroy_leaves_region_in_place() {
        let name = unique_name("ad");
        let owner = SharedRegion::create(&name, 8).unwrap();
        let attacher = SharedRegion::open(&name, 8).unwrap();
        attacher.destroy().unwrap();

        let again = SharedRegion::open(&name, 8).unwrap();
        drop(again);
        owner.destroy().unwrap();
        assert!(!SharedRegion::unlink(&name).unwrap());
    }

    #[test]
    fn stale_owner_does_not_unlink_successor() {
        let name = unique_name("st");
        let stale = SharedRegion::create(&name, 8).unwrap();
        let successor = SharedRegion::create_or_replace(&name, 8).unwrap();

        drop(stale);
        let attacher = SharedRegion::open(&name, 8);
        assert!(attacher.is_ok(), "successor's region must survive");

        drop(attacher);
        drop(successor);
        assert!(matches!(
            SharedRegion::open(&name, 8),
            Err(ShmError::NotFound { .. })
        ));
    }

    #[test]
    fn create_or_replace_takes_over_stale_name() {
        let name = unique_name("rp");
        let mut stale = SharedRegion::create(&name, 8).unwrap();
        stale.write_u64(0, 7);

        let replacement = SharedRegion::create_or_replace(&name, 16).unwrap();
        assert_eq!(replacement.len(), 16);
        assert_eq!(replacement.read_u64(0), 0);
        assert_eq!(stale.read_u64(0), 7, "old mapping stays valid");
    }

    #[test]
    fn open_with_retry_gives_up_after_policy() {
        let name = unique_name("rt");
        let policy = RetryPolicy::new(3, Duration::from_millis(20));
        let start = Instant::now();

        let err = SharedRegion::open_with_retry(&name, 8, &policy).unwrap_err();
        assert!(matches!(
            err,
            ShmError::RetriesExhausted { attempts: 3, .. }
        ));
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn open_with_retry_waits_for_owner() {
        let name = unique_name("rw");
        let creator_name = name.clone();
        let creator = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            SharedRegion::create(&creator_name, 8).unwrap()
        });

        let policy = RetryPolicy::new(50, Duration::from_millis(20));
        let attacher = SharedRegion::open_with_retry(&name, 8, &policy).unwrap();
        assert_eq!(attacher.role(), Role::Attacher);
        drop(attacher);
        drop(creator.join().unwrap());
    }

    #[test]
    fn open_with_retry_does_not_retry_fatal_errors() {
        let name = unique_name("ft");
        let _owner = SharedRegion::create(&name, 8).unwrap();
        let policy = RetryPolicy::new(5, Duration::from_secs(5));
        let start = Instant::now();

        let err = SharedRegion::open_with_retry(&name, 64, &policy).unwrap_err();
        assert!(matches!(err, ShmError::RegionTooSmall { .. }));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
