use std::{ptr::NonNull, sync::OnceLock};

/// Virtual memory page size of the computer. This is usually 4096.
/// It should be a constant, but we don't know the value at compile
/// time, so it is asked to the kernel once and cached.
static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// Fallback used if the kernel reports a nonsensical page size.
const DEFAULT_PAGE_SIZE: usize = 4096;

/// Zero sized handle to the platform virtual memory API. All the
/// interesting stuff lives in the [`PlatformMemory`] implementations below.
pub(crate) struct Kernel;

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. The allocator only needs to reserve an address range, make
/// pages of it accessible one at a time and give it back at the end, which
/// has nothing to do with the concrete APIs offered by each kernel.
///
/// ```text
///  reserve(len)                commit(addr, page)
/// +-------------------------+  +------+------------------+
/// |      inaccessible       |  | R/W  |   inaccessible   |
/// +-------------------------+  +------+------------------+
/// ```
trait PlatformMemory {
    /// Reserves an address range of `len` bytes without making it accessible.
    /// It returns a pointer to the start of the range or None if the underlying
    /// syscall fails.
    unsafe fn reserve(len: usize) -> Option<NonNull<u8>>;

    /// Makes `[addr, addr + len)` readable and writable. `addr` must be page
    /// aligned and lie inside a range returned by [`PlatformMemory::reserve`].
    unsafe fn commit(addr: NonNull<u8>, len: usize) -> bool;

    /// Returns the whole reservation of size `len` starting from `addr` back to the kernel.
    unsafe fn release(addr: NonNull<u8>, len: usize);

    /// Returns the virtual memory page size of the computer in bytes.
    unsafe fn page_size() -> usize;
}

/// Wrapper to calculate the computer's page size.
#[inline]
pub(crate) fn page_size() -> usize {
    *PAGE_SIZE.get_or_init(|| {
        let size = unsafe { Kernel::page_size() };

        if size.is_power_of_two() { size } else { DEFAULT_PAGE_SIZE }
    })
}

/// Wrapper to use [`Kernel::reserve`]
#[inline]
pub(crate) unsafe fn reserve(len: usize) -> Option<NonNull<u8>> {
    unsafe { Kernel::reserve(len) }
}

/// Wrapper to use [`Kernel::commit`]
#[inline]
pub(crate) unsafe fn commit(addr: NonNull<u8>, len: usize) -> bool {
    unsafe { Kernel::commit(addr, len) }
}

/// Wrapper to use [`Kernel::release`]
#[inline]
pub(crate) unsafe fn release(addr: NonNull<u8>, len: usize) {
    unsafe { Kernel::release(addr, len) }
}

#[cfg(unix)]
mod unix {
    use super::{Kernel, PlatformMemory};

    use libc::{mmap, mprotect, munmap, off_t, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    impl PlatformMemory for Kernel {
        unsafe fn reserve(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // No access at all until a page gets committed.
            const PROT: c_int = libc::PROT_NONE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

                if addr == libc::MAP_FAILED {
                    return None;
                }

                NonNull::new(addr.cast::<u8>())
            }
        }

        unsafe fn commit(addr: NonNull<u8>, len: usize) -> bool {
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;

            unsafe { mprotect(addr.as_ptr().cast::<c_void>(), len as size_t, PROT) == 0 }
        }

        unsafe fn release(addr: NonNull<u8>, len: usize) {
            unsafe {
                munmap(addr.as_ptr().cast::<c_void>(), len as size_t);
            }
        }

        unsafe fn page_size() -> usize {
            let size = unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) };

            if size < 1 { 0 } else { size as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use crate::kernel::{Kernel, PlatformMemory};

    use windows::Win32::System::{Memory, SystemInformation};

    impl PlatformMemory for Kernel {
        unsafe fn reserve(len: usize) -> Option<NonNull<u8>> {
            unsafe {
                let addr = Memory::VirtualAlloc(None, len, Memory::MEM_RESERVE, Memory::PAGE_NOACCESS);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn commit(addr: NonNull<u8>, len: usize) -> bool {
            unsafe {
                let committed = Memory::VirtualAlloc(
                    Some(addr.as_ptr() as *const c_void),
                    len,
                    Memory::MEM_COMMIT,
                    Memory::PAGE_READWRITE,
                );

                !committed.is_null()
            }
        }

        unsafe fn release(addr: NonNull<u8>, _len: usize) {
            // MEM_RELEASE requires a size of 0 and frees the whole reservation.
            unsafe {
                let _ = Memory::VirtualFree(addr.as_ptr().cast::<c_void>(), 0, Memory::MEM_RELEASE);
            }
        }

        unsafe fn page_size() -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwPageSize as usize
            }
        }
    }
}
