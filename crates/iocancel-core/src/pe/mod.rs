//! PE views over images that the Windows loader already mapped.
//!
//! The platform layer passes the whole image (`SizeOfImage` bytes from the
//! module base) as one slice, so every offset here is an RVA.

pub mod imports;

pub use imports::{ImportDescriptor, find_iat_slots, import_descriptors};

/// `MZ`
const DOS_MAGIC: u16 = 0x5A4D;
/// `PE\0\0`
const PE_SIGNATURE: u32 = 0x0000_4550;
const E_LFANEW_OFFSET: usize = 0x3C;
/// Signature plus `IMAGE_FILE_HEADER`.
const OPTIONAL_HEADER_OFFSET: usize = 24;
const SIZE_OF_IMAGE_OFFSET: usize = 56;

/// Error type for PE parsing operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeError {
    /// Missing `MZ` header
    BadDosMagic(u16),
    /// Missing `PE\0\0` signature
    BadSignature(u32),
    /// Optional header magic is neither PE32 nor PE32+
    UnknownOptionalMagic(u16),
    /// An RVA points outside the image
    OutOfBounds { kind: &'static str, rva: u64 },
    /// An import name is not valid text
    InvalidName(u32),
}

impl core::fmt::Display for PeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::BadDosMagic(m) => write!(f, "bad DOS magic: {m:#06x}"),
            Self::BadSignature(s) => write!(f, "bad PE signature: {s:#010x}"),
            Self::UnknownOptionalMagic(m) => write!(f, "unknown optional header magic: {m:#06x}"),
            Self::OutOfBounds { kind, rva } => write!(f, "{kind} out of bounds at rva {rva:#x}"),
            Self::InvalidName(rva) => write!(f, "invalid import name at rva {rva:#x}"),
        }
    }
}

impl std::error::Error for PeError {}

/// Result type for PE operations.
pub type PeResult<T> = Result<T, PeError>;

/// Image flavour, which fixes the thunk width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeKind {
    /// `0x10B`, 4-byte thunks
    Pe32,
    /// `0x20B`, 8-byte thunks
    Pe32Plus,
}

impl PeKind {
    /// Width of one thunk (and one IAT slot) in bytes.
    pub fn thunk_size(self) -> usize {
        match self {
            Self::Pe32 => 4,
            Self::Pe32Plus => 8,
        }
    }

    fn ordinal_flag(self) -> u64 {
        match self {
            Self::Pe32 => 1 << 31,
            Self::Pe32Plus => 1 << 63,
        }
    }

    /// Offset of the import data directory inside the optional header.
    fn import_directory_offset(self) -> usize {
        match self {
            Self::Pe32 => 104,
            Self::Pe32Plus => 120,
        }
    }
}

/// The parts of the headers the import walk needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeHeaders {
    pub kind: PeKind,
    pub size_of_image: u32,
    /// Import directory as `(rva, size)`; `(0, 0)` when the image imports nothing
    pub import_directory: (u32, u32),
}

impl PeHeaders {
    /// Parse from the first bytes of a mapped image.
    pub fn parse(image: &[u8]) -> PeResult<Self> {
        let dos = read_u16(image, 0, "DOS header")?;
        if dos != DOS_MAGIC {
            return Err(PeError::BadDosMagic(dos));
        }
        let nt = read_u32(image, E_LFANEW_OFFSET, "e_lfanew")? as usize;
        let signature = read_u32(image, nt, "NT headers")?;
        if signature != PE_SIGNATURE {
            return Err(PeError::BadSignature(signature));
        }

        let optional = nt + OPTIONAL_HEADER_OFFSET;
        let kind = match read_u16(image, optional, "optional header")? {
            0x10B => PeKind::Pe32,
            0x20B => PeKind::Pe32Plus,
            other => return Err(PeError::UnknownOptionalMagic(other)),
        };
        let size_of_image = read_u32(image, optional + SIZE_OF_IMAGE_OFFSET, "SizeOfImage")?;
        let dir = optional + kind.import_directory_offset();
        let import_directory = (
            read_u32(image, dir, "import directory")?,
            read_u32(image, dir + 4, "import directory")?,
        );

        Ok(Self {
            kind,
            size_of_image,
            import_directory,
        })
    }
}

pub(crate) fn read_u16(image: &[u8], offset: usize, kind: &'static str) -> PeResult<u16> {
    let bytes = field(image, offset, 2, kind)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn read_u32(image: &[u8], offset: usize, kind: &'static str) -> PeResult<u32> {
    let bytes = field(image, offset, 4, kind)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Read one thunk, zero-extended to 64 bits.
pub(crate) fn read_thunk(image: &[u8], offset: usize, kind: PeKind) -> PeResult<u64> {
    let bytes = field(image, offset, kind.thunk_size(), "thunk")?;
    let mut raw = [0u8; 8];
    raw[..bytes.len()].copy_from_slice(bytes);
    Ok(u64::from_le_bytes(raw))
}

fn field<'a>(image: &'a [u8], offset: usize, len: usize, kind: &'static str) -> PeResult<&'a [u8]> {
    offset
        .checked_add(len)
        .and_then(|end| image.get(offset..end))
        .ok_or(PeError::OutOfBounds {
            kind,
            rva: offset as u64,
        })
}


#[cfg(test)]
mod tests {
    use super::testimage::*;
    use super::*;

    #[test]
    fn parses_pe32_plus_headers() {
        let mut builder = ImageBuilder::new();
        builder.descriptor("WS2_32.dll", 0x400, &[Some("WSARecv")]);
        let headers = PeHeaders::parse(&builder.image).unwrap();
        assert_eq!(headers.kind, PeKind::Pe32Plus);
        assert_eq!(headers.size_of_image, 0x2000);
        assert_eq!(headers.import_directory, (IMPORT_DIR as u32, 40));
    }

    #[test]
    fn rejects_bad_magic_and_signature() {
        let mut builder = ImageBuilder::new();
        builder.image[0] = 0;
        assert!(matches!(
            PeHeaders::parse(&builder.image),
            Err(PeError::BadDosMagic(_))
        ));

        let mut builder = ImageBuilder::new();
        builder.put_u32(NT, 0x1234);
        assert_eq!(
            PeHeaders::parse(&builder.image),
            Err(PeError::BadSignature(0x1234))
        );
    }

    #[test]
    fn truncated_image_is_out_of_bounds() {
        let builder = ImageBuilder::new();
        assert!(matches!(
            PeHeaders::parse(&builder.image[..0x90]),
            Err(PeError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn thunk_width_follows_kind() {
        let data = 0x8000_0000_0000_0011u64.to_le_bytes();
        assert_eq!(read_thunk(&data, 0, PeKind::Pe32).unwrap(), 0x11);
        assert_eq!(
            read_thunk(&data, 0, PeKind::Pe32Plus).unwrap(),
            0x8000_0000_0000_0011
        );
        assert!(PeKind::Pe32Plus.ordinal_flag() & 0x8000_0000_0000_0011 != 0);
    }
}
