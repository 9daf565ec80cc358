//! ELF64 program headers and the memory map they imply.
//!
//! The loader keeps the program header table of every object mapped, so the
//! platform layer can hand it over as a slice and ask which protection a
//! dispatch slot currently lives under.

use super::{ElfError, ElfResult};

/// Program header type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramType {
    /// Unused entry
    Null,
    /// Loadable segment
    Load,
    /// Dynamic linking information
    Dynamic,
    /// GNU relocation read-only
    GnuRelro,
    /// Any other segment type
    Other(u32),
}

impl From<u32> for ProgramType {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::Null,
            1 => Self::Load,
            2 => Self::Dynamic,
            0x6474_e552 => Self::GnuRelro,
            other => Self::Other(other),
        }
    }
}

/// Program header flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramFlags(pub u32);

impl ProgramFlags {
    /// Execute permission
    pub const PF_X: u32 = 0x1;
    /// Write permission
    pub const PF_W: u32 = 0x2;
    /// Read permission
    pub const PF_R: u32 = 0x4;

    /// Check if executable.
    pub fn is_executable(self) -> bool {
        self.0 & Self::PF_X != 0
    }

    /// Check if writable.
    pub fn is_writable(self) -> bool {
        self.0 & Self::PF_W != 0
    }

    /// Check if readable.
    pub fn is_readable(self) -> bool {
        self.0 & Self::PF_R != 0
    }

    /// Convert to `mprotect` protection bits
    /// (`PROT_READ` = 0x1, `PROT_WRITE` = 0x2, `PROT_EXEC` = 0x4).
    pub fn to_mmap_prot(self) -> i32 {
        let mut prot = 0i32;
        if self.is_readable() {
            prot |= PROT_READ;
        }
        if self.is_writable() {
            prot |= PROT_WRITE;
        }
        if self.is_executable() {
            prot |= PROT_EXEC;
        }
        prot
    }
}

/// `PROT_READ`
pub const PROT_READ: i32 = 0x1;
/// `PROT_WRITE`
pub const PROT_WRITE: i32 = 0x2;
/// `PROT_EXEC`
pub const PROT_EXEC: i32 = 0x4;

/// ELF64 program header.
#[derive(Debug, Clone, Copy)]
pub struct Elf64ProgramHeader {
    /// Segment type
    pub p_type: ProgramType,
    /// Segment flags
    pub p_flags: ProgramFlags,
    /// Virtual address, relative to the load bias for shared objects
    pub p_vaddr: u64,
    /// Size in memory
    pub p_memsz: u64,
}

impl Elf64ProgramHeader {
    /// Size of an ELF64 program header in bytes.
    pub const SIZE: usize = 56;

    /// Parse a program header from a byte slice.
    pub fn parse(data: &[u8]) -> ElfResult<Self> {
        if data.len() < Self::SIZE {
            return Err(ElfError::BufferTooSmall {
                needed: Self::SIZE,
                available: data.len(),
            });
        }

        let p_type = ProgramType::from(u32::from_le_bytes([data[0], data[1], data[2], data[3]]));
        let p_flags = ProgramFlags(u32::from_le_bytes([data[4], data[5], data[6], data[7]]));
        let p_vaddr = super::read_u64(data, 16)?;
        let p_memsz = super::read_u64(data, 40)?;

        Ok(Self {
            p_type,
            p_flags,
            p_vaddr,
            p_memsz,
        })
    }

    /// Check if this is a loadable segment.
    pub fn is_load(&self) -> bool {
        matches!(self.p_type, ProgramType::Load)
    }

    /// Check if this is the dynamic segment.
    pub fn is_dynamic(&self) -> bool {
        matches!(self.p_type, ProgramType::Dynamic)
    }

    /// Check if this is the GNU_RELRO segment.
    pub fn is_relro(&self) -> bool {
        matches!(self.p_type, ProgramType::GnuRelro)
    }

    /// End of the segment in memory (exclusive).
    pub fn end(&self) -> u64 {
        self.p_vaddr.saturating_add(self.p_memsz)
    }
}

/// Parse the program header table of a mapped object.
pub fn parse_program_headers(
    data: &[u8],
    phoff: u64,
    phentsize: u16,
    phnum: u16,
) -> ElfResult<Vec<Elf64ProgramHeader>> {
    let phoff = phoff as usize;
    let phentsize = phentsize as usize;
    let phnum = phnum as usize;

    let table_len = phentsize.checked_mul(phnum).ok_or(ElfError::InvalidOffset {
        kind: "program header table",
        offset: phoff as u64,
    })?;
    let end_offset = phoff.checked_add(table_len).ok_or(ElfError::InvalidOffset {
        kind: "program header table",
        offset: phoff as u64,
    })?;

    if end_offset > data.len() {
        return Err(ElfError::BufferTooSmall {
            needed: end_offset,
            available: data.len(),
        });
    }

    (0..phnum)
        .map(|i| Elf64ProgramHeader::parse(&data[phoff + i * phentsize..]))
        .collect()
}

/// Memory layout of one mapped object, in load-bias-relative addresses.
#[derive(Debug, Clone, Default)]
pub struct SegmentMap {
    loads: Vec<(u64, u64, ProgramFlags)>,
    relro: Option<(u64, u64)>,
    dynamic: Option<(u64, u64)>,
}

impl SegmentMap {
    /// Build the map from the object's program headers.
    pub fn from_headers(headers: &[Elf64ProgramHeader]) -> Self {
        let mut map = Self::default();
        for ph in headers {
            if ph.is_load() {
                map.loads.push((ph.p_vaddr, ph.end(), ph.p_flags));
            } else if ph.is_relro() {
                map.relro = Some((ph.p_vaddr, ph.end()));
            } else if ph.is_dynamic() {
                map.dynamic = Some((ph.p_vaddr, ph.p_memsz));
            }
        }
        map
    }

    /// Clip `PT_GNU_RELRO` to the pages the loader actually write-protects:
    /// both ends round down, so a partial last page stays writable.
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        if page_size.is_power_of_two() {
            let mask = !(page_size - 1);
            self.relro = self
                .relro
                .map(|(start, end)| (start & mask, end & mask))
                .filter(|(start, end)| start < end);
        }
        self
    }

    /// `PT_DYNAMIC` as `(vaddr, memsz)`.
    pub fn dynamic(&self) -> Option<(u64, u64)> {
        self.dynamic
    }

    /// Lowest and highest mapped address of the object.
    pub fn image_range(&self) -> Option<(u64, u64)> {
        let start = self.loads.iter().map(|(s, _, _)| *s).min()?;
        let end = self.loads.iter().map(|(_, e, _)| *e).max()?;
        Some((start, end))
    }

    /// Whether `vaddr` falls inside one of the object's loadable segments.
    pub fn contains(&self, vaddr: u64) -> bool {
        self.loads.iter().any(|(s, e, _)| (*s..*e).contains(&vaddr))
    }

    /// Current protection of `vaddr` after the loader finished relocating.
    ///
    /// `PT_GNU_RELRO` wins over the enclosing `PT_LOAD`: the loader remaps it
    /// read-only once relocation is done. Call [`SegmentMap::with_page_size`]
    /// first for live objects.
    pub fn protection_at(&self, vaddr: u64) -> Option<i32> {
        if let Some((start, end)) = self.relro {
            if (start..end).contains(&vaddr) {
                return Some(PROT_READ);
            }
        }
        self.loads
            .iter()
            .find(|(s, e, _)| (*s..*e).contains(&vaddr))
            .map(|(_, _, flags)| flags.to_mmap_prot())
    }
}
