//! GOT/PLT access for ELF objects mapped by the dynamic loader.
//!
//! A candidate is looked up with `dlopen(RTLD_NOLOAD)`, so nothing is ever
//! loaded. The returned handle is kept and never closed: the module stays
//! pinned while its slots point at our stubs.
//!
//! The module's program headers come from `dl_iterate_phdr` (matched on the
//! address of `PT_DYNAMIC`), and the import tables are read in place from
//! the segments the loader mapped.

use std::ffi::{CString, c_char, c_int, c_void};
use std::sync::atomic::{AtomicUsize, Ordering};

use iocancel_core::elf::{
    self, DynamicTables, Elf64ProgramHeader, Elf64Symbol, ImportView, RelocArch, SegmentMap,
    parse_program_headers,
};
use iocancel_core::{DispatchTable, ModuleLocator, SlotFault, SlotPlan, SlotRecord};

/// `RTLD_DI_LINKMAP`
const RTLD_DI_LINKMAP: c_int = 2;
const PROT_WRITE: i32 = elf::program::PROT_WRITE;

/// Leading fields of glibc's `struct link_map`.
#[repr(C)]
struct LinkMap {
    l_addr: usize,
    _l_name: *const c_char,
    l_ld: *const c_void,
}

#[link(name = "dl")]
unsafe extern "C" {
    fn dlinfo(handle: *mut c_void, request: c_int, info: *mut c_void) -> c_int;
}

/// Finds already-loaded shared objects by soname.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElfLocator;

impl ModuleLocator for ElfLocator {
    type Table = ElfModule;

    fn locate(&self, candidate: &str) -> Option<ElfModule> {
        ElfModule::open(candidate)
    }
}

#[derive(Debug, Clone)]
struct Layout {
    segments: SegmentMap,
    tables: DynamicTables,
}

/// Import slots of one loaded shared object.
#[derive(Debug)]
pub struct ElfModule {
    handle: *mut c_void,
    base: usize,
    dynamic: usize,
    page_size: usize,
    layout: Option<Layout>,
}

impl ElfModule {
    /// Handle to `name` if the loader already mapped it.
    pub fn open(name: &str) -> Option<Self> {
        let c_name = CString::new(name).ok()?;
        // SAFETY: RTLD_NOLOAD only hands out a handle for an object that is
        // already mapped; nothing is loaded or initialized.
        let handle = unsafe { libc::dlopen(c_name.as_ptr(), libc::RTLD_LAZY | libc::RTLD_NOLOAD) };
        if handle.is_null() {
            return None;
        }

        let mut map: *mut LinkMap = std::ptr::null_mut();
        // SAFETY: `handle` is live and RTLD_DI_LINKMAP writes one pointer.
        let rc = unsafe {
            dlinfo(
                handle,
                RTLD_DI_LINKMAP,
                (&mut map as *mut *mut LinkMap).cast::<c_void>(),
            )
        };
        if rc != 0 || map.is_null() {
            // SAFETY: balances the dlopen above.
            unsafe { libc::dlclose(handle) };
            return None;
        }
        // SAFETY: the loader keeps the link map alive while the object is
        // loaded, and our handle keeps it loaded.
        let (base, dynamic) = unsafe { ((*map).l_addr, (*map).l_ld as usize) };

        // SAFETY: sysconf has no preconditions.
        let page_size = match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
            n if n > 0 => n as usize,
            _ => 4096,
        };

        Some(Self {
            handle,
            base,
            dynamic,
            page_size,
            layout: None,
        })
    }

    /// Load bias of the object.
    pub fn base(&self) -> usize {
        self.base
    }

    fn layout(&mut self) -> Result<Layout, SlotFault> {
        if self.layout.is_none() {
            self.layout = Some(self.read_layout()?);
        }
        self.layout
            .clone()
            .ok_or_else(|| SlotFault::Malformed("layout unavailable".into()))
    }

    fn read_layout(&self) -> Result<Layout, SlotFault> {
        let segments = program_headers_for(self.dynamic)
            .ok_or_else(|| SlotFault::Malformed("object not reported by dl_iterate_phdr".into()))?
            .with_page_size(self.page_size as u64);
        let (_, dyn_size) = segments
            .dynamic()
            .ok_or_else(|| SlotFault::Malformed("no PT_DYNAMIC segment".into()))?;
        // SAFETY: PT_DYNAMIC is mapped for as long as the object is loaded.
        let dynamic = unsafe { mapped_bytes(self.dynamic as u64, dyn_size) };
        let tables = DynamicTables::parse(dynamic)?.rebase(self.base as u64);
        Ok(Layout { segments, tables })
    }

    fn in_image(&self, segments: &SegmentMap, addr: usize) -> bool {
        addr.checked_sub(self.base)
            .is_some_and(|offset| segments.contains(offset as u64))
    }

    /// What the lazy binder would eventually store for `symbol`.
    fn bound_target(&self, symbol: &str) -> Result<usize, SlotFault> {
        let c_symbol =
            CString::new(symbol).map_err(|_| SlotFault::Malformed("symbol contains NUL".into()))?;
        // SAFETY: `handle` is live; dlsym searches the object and its
        // dependencies in load order.
        let addr = unsafe { libc::dlsym(self.handle, c_symbol.as_ptr()) };
        if addr.is_null() {
            Err(SlotFault::SymbolAbsent)
        } else {
            Ok(addr as usize)
        }
    }

    fn store(&self, segments: &SegmentMap, address: usize, value: usize) -> Result<(), SlotFault> {
        let offset = address.wrapping_sub(self.base) as u64;
        let prot = segments.protection_at(offset).ok_or(SlotFault::NotWritable {
            address,
            errno: libc::EFAULT,
        })?;

        if prot & PROT_WRITE != 0 {
            // SAFETY: the slot lies in a writable segment of a pinned object
            // and is pointer-aligned.
            unsafe { slot(address).store(value, Ordering::Release) };
            return Ok(());
        }

        // Slots are pointer-aligned, so one page always covers them.
        let page = address & !(self.page_size - 1);
        // SAFETY: the page belongs to the object; PROT_* values match the
        // ELF-derived bits.
        if unsafe { libc::mprotect(page as *mut c_void, self.page_size, prot | libc::PROT_WRITE) } != 0 {
            return Err(SlotFault::NotWritable {
                address,
                errno: super::errno(),
            });
        }
        // SAFETY: the page was just made writable.
        unsafe { slot(address).store(value, Ordering::Release) };
        // Leaving the page writable is harmless if this fails.
        // SAFETY: same page, original protection.
        let _ = unsafe { libc::mprotect(page as *mut c_void, self.page_size, prot) };
        Ok(())
    }
}

impl DispatchTable for ElfModule {
    fn plan(&mut self, symbol: &str) -> Result<SlotPlan, SlotFault> {
        let arch = RelocArch::host()
            .ok_or_else(|| SlotFault::Malformed("unsupported relocation architecture".into()))?;
        let layout = self.layout()?;
        let tables = layout.tables;
        if !tables.has_import_relocations() {
            return Ok(SlotPlan {
                slots: Vec::new(),
                original: 0,
            });
        }

        // SAFETY: all four tables live in segments the loader mapped
        // read-only for the object's lifetime, at the sizes the dynamic
        // section declares. `.dynsym` is cut at the highest index any
        // binding relocation uses.
        let (plt_relocs, dyn_relocs) = unsafe {
            (
                mapped_bytes(tables.jmprel, tables.pltrelsz),
                mapped_bytes(tables.rela, tables.relasz),
            )
        };
        let max_index = elf::max_symbol_index(plt_relocs, dyn_relocs, arch)?;
        let symtab_len = (u64::from(max_index) + 1) * Elf64Symbol::SIZE as u64;
        let view = unsafe {
            ImportView {
                plt_relocs,
                dyn_relocs,
                symtab: mapped_bytes(tables.symtab, symtab_len),
                strtab: mapped_bytes(tables.strtab, tables.strsz),
            }
        };

        let mut slots = Vec::new();
        for offset in elf::find_import_slots(&view, arch, symbol)? {
            if !layout.segments.contains(offset) {
                return Err(SlotFault::Malformed(format!(
                    "slot offset {offset:#x} outside the object"
                )));
            }
            let address = self.base.wrapping_add(offset as usize);
            // SAFETY: inside a loaded segment, pointer-aligned.
            let previous = unsafe { slot(address).load(Ordering::Acquire) };
            slots.push(SlotRecord { address, previous });
        }

        // A slot still pointing into the object is an unresolved PLT entry.
        let original = match slots
            .iter()
            .map(|s| s.previous)
            .find(|&p| p != 0 && !self.in_image(&layout.segments, p))
        {
            Some(target) => target,
            None if slots.is_empty() => 0,
            None => self.bound_target(symbol)?,
        };

        Ok(SlotPlan { slots, original })
    }

    fn write_all(&mut self, plan: &SlotPlan, value: usize) -> Result<(), SlotFault> {
        let layout = self.layout()?;
        for record in &plan.slots {
            self.store(&layout.segments, record.address, value)?;
        }
        Ok(())
    }

    fn restore(&mut self, plan: &SlotPlan) -> Result<(), SlotFault> {
        let layout = self.layout()?;
        let mut first_fault = None;
        for record in &plan.slots {
            if let Err(fault) = self.store(&layout.segments, record.address, record.previous) {
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
/// `address` must be a pointer-aligned slot inside a mapped segment that
/// outlives the returned reference.
unsafe fn slot(address: usize) -> &'static AtomicUsize {
    unsafe { AtomicUsize::from_ptr(address as *mut usize) }
}

/// # Safety
///
/// `[addr, addr + len)` must be mapped and readable for the rest of the
/// process lifetime.
unsafe fn mapped_bytes(addr: u64, len: u64) -> &'static [u8] {
    if addr == 0 || len == 0 {
        return &[];
    }
    unsafe { std::slice::from_raw_parts(addr as usize as *const u8, len as usize) }
}

struct PhdrQuery {
    dynamic: usize,
    found: Option<SegmentMap>,
}

/// Segment map of the loaded object whose `PT_DYNAMIC` sits at `dynamic`.
fn program_headers_for(dynamic: usize) -> Option<SegmentMap> {
    let mut query = PhdrQuery {
        dynamic,
        found: None,
    };
    // SAFETY: the callback only reads the headers it is handed and writes
    // through `data`, which points at `query` for the duration of the call.
    unsafe {
        libc::dl_iterate_phdr(
            Some(visit_object),
            (&mut query as *mut PhdrQuery).cast::<c_void>(),
        );
    }
    query.found
}

unsafe extern "C" fn visit_object(
    info: *mut libc::dl_phdr_info,
    _size: libc::size_t,
    data: *mut c_void,
) -> c_int {
    // SAFETY: dl_iterate_phdr passes a valid info record and our `data`.
    let (info, query) = unsafe { (&*info, &mut *data.cast::<PhdrQuery>()) };
    if info.dlpi_phdr.is_null() || info.dlpi_phnum == 0 {
        return 0;
    }

    let phnum = info.dlpi_phnum;
    let len = usize::from(phnum) * Elf64ProgramHeader::SIZE;
    // SAFETY: the loader keeps `dlpi_phnum` headers at `dlpi_phdr`.
    let bytes = unsafe { std::slice::from_raw_parts(info.dlpi_phdr.cast::<u8>(), len) };
    let Ok(headers) = parse_program_headers(bytes, 0, Elf64ProgramHeader::SIZE as u16, phnum) else {
        return 0;
    };
    let segments = SegmentMap::from_headers(&headers);
    match segments.dynamic() {
        Some((vaddr, _)) if (info.dlpi_addr as usize).wrapping_add(vaddr as usize) == query.dynamic => {
            query.found = Some(segments);
            1
        }
        _ => 0,
    }
}
