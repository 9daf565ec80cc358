//! IAT access for PE images the loader already mapped.
//!
//! Candidates are found with `GetModuleHandleA`, which never loads anything.
//! The handle is the image base; the import walk reads the image in place.
//! Modules found this way are not pinned with an extra reference: the driver
//! keeps its network DLLs loaded for the life of the process.

use std::ffi::{CString, c_void};
use std::sync::atomic::{AtomicUsize, Ordering};

use iocancel_core::pe::{self, PeHeaders};
use iocancel_core::{DispatchTable, ModuleLocator, SlotFault, SlotPlan, SlotRecord};
use windows_sys::Win32::Foundation::GetLastError;
use windows_sys::Win32::System::LibraryLoader::GetModuleHandleA;
use windows_sys::Win32::System::Memory::{PAGE_PROTECTION_FLAGS, PAGE_READWRITE, VirtualProtect};

/// Enough for the DOS stub, NT headers and data directories.
const HEADER_PROBE: usize = 0x1000;

/// Finds already-loaded DLLs by file name.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeLocator;

impl ModuleLocator for PeLocator {
    type Table = PeModule;

    fn locate(&self, candidate: &str) -> Option<PeModule> {
        PeModule::open(candidate)
    }
}

/// Import address table of one loaded DLL.
#[derive(Debug)]
pub struct PeModule {
    base: usize,
    headers: Option<PeHeaders>,
}

impl PeModule {
    /// The module named `name`, if it is already mapped.
    pub fn open(name: &str) -> Option<Self> {
        let c_name = CString::new(name).ok()?;
        // SAFETY: lookup only; the reference count is not touched.
        let module = unsafe { GetModuleHandleA(c_name.as_ptr().cast()) };
        if module.is_null() {
            return None;
        }
        Some(Self {
            base: module as usize,
            headers: None,
        })
    }

    /// Image base.
    pub fn base(&self) -> usize {
        self.base
    }

    fn headers(&mut self) -> Result<PeHeaders, SlotFault> {
        if let Some(headers) = self.headers {
            return Ok(headers);
        }
        // SAFETY: the loader maps at least the first page of every image.
        let probe = unsafe { image_bytes(self.base, HEADER_PROBE) };
        let headers = PeHeaders::parse(probe)?;
        self.headers = Some(headers);
        Ok(headers)
    }

    fn store(&self, address: usize, value: usize) -> Result<(), SlotFault> {
        let size = std::mem::size_of::<usize>();
        let mut previous: PAGE_PROTECTION_FLAGS = 0;
        // SAFETY: `address` is an IAT slot inside the mapped image.
        let ok = unsafe {
            VirtualProtect(
                address as *const c_void,
                size,
                PAGE_READWRITE,
                &mut previous,
            )
        };
        if ok == 0 {
            return Err(SlotFault::NotWritable {
                address,
                // SAFETY: reads the calling thread's last-error value.
                errno: unsafe { GetLastError() } as i32,
            });
        }
        // SAFETY: the page is writable and IAT slots are pointer-aligned.
        unsafe { slot(address).store(value, Ordering::Release) };
        let mut ignored: PAGE_PROTECTION_FLAGS = 0;
        // Leaving the page writable is harmless if this fails.
        // SAFETY: same range, the protection it had before.
        let _ = unsafe { VirtualProtect(address as *const c_void, size, previous, &mut ignored) };
        Ok(())
    }
}

impl DispatchTable for PeModule {
    fn plan(&mut self, symbol: &str) -> Result<SlotPlan, SlotFault> {
        let headers = self.headers()?;
        if headers.kind.thunk_size() != std::mem::size_of::<usize>() {
            return Err(SlotFault::Malformed(
                "image bitness differs from the process".into(),
            ));
        }
        // SAFETY: SizeOfImage bytes from the base are reserved for the
        // image; the import tables are readable once the loader is done.
        let image = unsafe { image_bytes(self.base, headers.size_of_image as usize) };

        let mut slots = Vec::new();
        for rva in pe::find_iat_slots(image, &headers, symbol)? {
            let address = self.base.wrapping_add(rva as usize);
            // SAFETY: inside the image, pointer-aligned.
            let previous = unsafe { slot(address).load(Ordering::Acquire) };
            slots.push(SlotRecord { address, previous });
        }

        // The loader binds every IAT entry before DllMain runs.
        let original = slots.first().map_or(0, |s| s.previous);
        Ok(SlotPlan { slots, original })
    }

    fn write_all(&mut self, plan: &SlotPlan, value: usize) -> Result<(), SlotFault> {
        for record in &plan.slots {
            self.store(record.address, value)?;
        }
        Ok(())
    }

    fn restore(&mut self, plan: &SlotPlan) -> Result<(), SlotFault> {
        let mut first_fault = None;
        for record in &plan.slots {
            if let Err(fault) = self.store(record.address, record.previous) {
                first_fault.get_or_insert(fault);
            }
        }
        match first_fault {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }
}

/// # Safety
///
/// `address` must be a pointer-aligned slot in a mapped image that stays
/// loaded.
unsafe fn slot(address: usize) -> &'static AtomicUsize {
    unsafe { AtomicUsize::from_ptr(address as *mut usize) }
}

/// # Safety
///
/// `[base, base + len)` must be mapped and readable for the rest of the
/// process lifetime.
unsafe fn image_bytes(base: usize, len: usize) -> &'static [u8] {
    unsafe { std::slice::from_raw_parts(base as *const u8, len) }
}
