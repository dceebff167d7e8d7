//! Shared-memory task table: the cross-process producer/consumer registry.
//!
//! `/tbulmkd_tasklist` is a POSIX shared-memory object holding one
//! process-shared semaphore followed by `MAX_NR_TASKS` fixed-size slots.
//! The Collector is the sole writer; the Enforcer only ever reads. Both
//! sides take the semaphore around the whole table (never a subrange, per
//! the invariant in the design doc) via [`TaskTable::lock`].

use crate::error::{DaemonError, Result};
use std::ffi::CString;
use std::mem::MaybeUninit;
use std::os::unix::io::RawFd;

pub const MAX_NR_TASKS: usize = 1000;
const SHM_NAME: &str = "/tbulmkd_tasklist";

/// One task's record in shared memory. `pid == 0` is the end-of-list
/// sentinel. `#[repr(C)]` because this is a plain-old-data layout shared
/// across two processes built for the same target — there is no portable
/// on-disk format.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSlot {
    pub pid: libc::pid_t,
    pub time: libc::time_t,
    pub activity: libc::c_int,
    pub tty_nr: libc::c_int,
}

impl TaskSlot {
    pub const EMPTY: TaskSlot = TaskSlot {
        pid: 0,
        time: 0,
        activity: 0,
        tty_nr: 0,
    };

    pub fn is_sentinel(&self) -> bool {
        self.pid == 0
    }
}

#[repr(C)]
struct RawTable {
    sem: libc::sem_t,
    slots: [TaskSlot; MAX_NR_TASKS],
}

/// A mapped handle to the shared-memory region. Owns the mmap; does not
/// own the shm object's lifetime (unlinking is the Collector's job, done
/// separately so the Enforcer's `open` path never unlinks anything).
pub struct TaskTable {
    ptr: *mut RawTable,
    fd: RawFd,
}

unsafe impl Send for TaskTable {}
unsafe impl Sync for TaskTable {}

fn shm_name_cstr() -> CString {
    CString::new(SHM_NAME).expect("shm name has no interior NUL")
}

/// Unlinks `/tbulmkd_tasklist` from the filesystem namespace. Collector-only:
/// the Enforcer never owns the object's lifecycle. Safe to call even if the
/// object doesn't exist; the return value is ignored by callers.
pub fn unlink() {
    let name = shm_name_cstr();
    unsafe {
        libc::shm_unlink(name.as_ptr());
    }
}

impl TaskTable {
    /// Collector-side constructor: unlink any stale object, create fresh,
    /// size it, map it, and initialize the semaphore as process-shared
    /// with an initial value of 1.
    pub fn create() -> Result<TaskTable> {
        let name = shm_name_cstr();
        unsafe {
            libc::shm_unlink(name.as_ptr());
        }

        let fd = unsafe { libc::shm_open(name.as_ptr(), libc::O_RDWR | libc::O_CREAT, 0o600) };
        if fd < 0 {
            return Err(DaemonError::sys("shm_open"));
        }

        let size = std::mem::size_of::<RawTable>();
        if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
            unsafe { libc::close(fd) };
            return Err(DaemonError::sys("ftruncate"));
        }

        let ptr = map(fd, size)?;

        // SAFETY: `ptr` was just mapped MAP_SHARED and is large enough for
        // RawTable; sem_init with pshared=1 is valid for a shared mapping.
        let sem_ret = unsafe { libc::sem_init(&mut (*ptr).sem, 1, 1) };
        if sem_ret != 0 {
            unsafe {
                libc::munmap(ptr as *mut libc::c_void, size);
                libc::close(fd);
            }
            return Err(DaemonError::sys("sem_init"));
        }

        Ok(TaskTable { ptr, fd })
    }

    /// Enforcer-side constructor: open the existing object read/write and
    /// map it. Never unlinks, creates, or re-initializes the semaphore —
    /// the Enforcer is a reader of the table's lifecycle, not an owner.
    pub fn open() -> Result<TaskTable> {
        let name = shm_name_cstr();
        let fd = unsafe { libc::shm_open(name.as_ptr(), libc::O_RDWR, 0o600) };
        if fd < 0 {
            return Err(DaemonError::sys("shm_open"));
        }

        let size = std::mem::size_of::<RawTable>();
        if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
            unsafe { libc::close(fd) };
            return Err(DaemonError::sys("ftruncate"));
        }

        let ptr = map(fd, size)?;
        Ok(TaskTable { ptr, fd })
    }

    /// Acquires the table semaphore and returns a scoped guard giving
    /// access to the slot slice. The semaphore is released when the guard
    /// drops, including on early return or panic unwind.
    pub fn lock(&self) -> TaskTableGuard<'_> {
        unsafe {
            libc::sem_wait(&mut (*self.ptr).sem);
        }
        TaskTableGuard { table: self }
    }
}

fn map(fd: RawFd, size: usize) -> Result<*mut RawTable> {
    let addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED | libc::MAP_LOCKED,
            fd,
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        unsafe { libc::close(fd) };
        return Err(DaemonError::sys("mmap"));
    }
    Ok(addr as *mut RawTable)
}

impl Drop for TaskTable {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, std::mem::size_of::<RawTable>());
            libc::close(self.fd);
        }
    }
}

/// RAII scoped lock over the table's slots. Dropping releases the
/// semaphore; there is deliberately no way to hold a slot reference past
/// the guard's lifetime.
pub struct TaskTableGuard<'a> {
    table: &'a TaskTable,
}

impl TaskTableGuard<'_> {
    pub fn slots(&self) -> &[TaskSlot] {
        unsafe { &(*self.table.ptr).slots }
    }

    /// Mutable access, used only by the Collector. The Enforcer never
    /// calls this — that half of the read/write split is enforced by
    /// convention (both binaries share this module) rather than by the
    /// type system, matching the source's "sole writer" discipline.
    pub fn slots_mut(&mut self) -> &mut [TaskSlot] {
        unsafe { &mut (*self.table.ptr).slots }
    }
}

impl Drop for TaskTableGuard<'_> {
    fn drop(&mut self) {
        unsafe {
            libc::sem_post(&mut (*self.table.ptr).sem);
        }
    }
}

/// Overwrites the table from a fresh `/proc` scan: writes each slot in
/// enumeration order, then plants the sentinel immediately after (if
/// there's room). Matches the Collector loop in the design doc.
pub fn write_scan(guard: &mut TaskTableGuard<'_>, scanned: &[TaskSlot]) {
    let slots = guard.slots_mut();
    let n = scanned.len().min(MAX_NR_TASKS);
    slots[..n].copy_from_slice(&scanned[..n]);
    if n < MAX_NR_TASKS {
        slots[n] = TaskSlot::EMPTY;
    }
}

/// Reads the logical list out of a locked guard: everything up to (not
/// including) the first sentinel.
pub fn read_scan(guard: &TaskTableGuard<'_>) -> &[TaskSlot] {
    let slots = guard.slots();
    let k = slots.iter().position(TaskSlot::is_sentinel).unwrap_or(slots.len());
    &slots[..k]
}
