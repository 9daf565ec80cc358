//! Import descriptor walk and IAT slot lookup.

use super::{PeError, PeHeaders, PeResult, read_thunk, read_u32};

/// `sizeof(IMAGE_IMPORT_DESCRIPTOR)`
const DESCRIPTOR_SIZE: usize = 20;
const MAX_NAME_LEN: usize = 256;

/// One `IMAGE_IMPORT_DESCRIPTOR`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDescriptor {
    pub dll: String,
    /// Import name table; 0 when the linker omitted it
    pub original_first_thunk: u32,
    /// Import address table
    pub first_thunk: u32,
}

/// List the descriptors in directory order, stopping at the null entry.
pub fn import_descriptors(image: &[u8], headers: &PeHeaders) -> PeResult<Vec<ImportDescriptor>> {
    let (dir_rva, dir_size) = headers.import_directory;
    if dir_rva == 0 {
        return Ok(Vec::new());
    }
    // Some linkers under-report the size; the null descriptor is authoritative.
    let max = (dir_size as usize / DESCRIPTOR_SIZE).max(1) + 1;

    let mut descriptors = Vec::new();
    for index in 0..max {
        let at = dir_rva as usize + index * DESCRIPTOR_SIZE;
        let original_first_thunk = read_u32(image, at, "import descriptor")?;
        let name = read_u32(image, at + 12, "import descriptor")?;
        let first_thunk = read_u32(image, at + 16, "import descriptor")?;
        if original_first_thunk == 0 && name == 0 && first_thunk == 0 {
            break;
        }
        descriptors.push(ImportDescriptor {
            dll: read_name(image, name)?.to_owned(),
            original_first_thunk,
            first_thunk,
        });
    }
    Ok(descriptors)
}

/// RVAs of every IAT slot that imports `symbol` by name, from any DLL.
///
/// Descriptors without an import name table cannot be matched once the
/// loader has bound the IAT and are skipped. Ordinal imports never match.
pub fn find_iat_slots(image: &[u8], headers: &PeHeaders, symbol: &str) -> PeResult<Vec<u32>> {
    let width = headers.kind.thunk_size();
    let ordinal = headers.kind.ordinal_flag();
    let mut slots = Vec::new();

    for descriptor in import_descriptors(image, headers)? {
        if descriptor.original_first_thunk == 0 {
            continue;
        }
        let mut index = 0usize;
        loop {
            let thunk_at = descriptor.original_first_thunk as usize + index * width;
            let thunk = read_thunk(image, thunk_at, headers.kind)?;
            if thunk == 0 {
                break;
            }
            if thunk & ordinal == 0 {
                // Hint/name entry: u16 hint, then the name.
                let name_rva = u32::try_from(thunk.wrapping_add(2)).map_err(|_| {
                    PeError::OutOfBounds {
                        kind: "hint/name entry",
                        rva: thunk,
                    }
                })?;
                if read_name(image, name_rva)? == symbol {
                    slots.push(descriptor.first_thunk + (index * width) as u32);
                }
            }
            index += 1;
        }
    }
    Ok(slots)
}

fn read_name(image: &[u8], rva: u32) -> PeResult<&str> {
    let tail = image.get(rva as usize..).ok_or(PeError::OutOfBounds {
        kind: "name",
        rva: u64::from(rva),
    })?;
    let window = &tail[..tail.len().min(MAX_NAME_LEN)];
    let end = window
        .iter()
        .position(|&b| b == 0)
        .ok_or(PeError::InvalidName(rva))?;
    core::str::from_utf8(&window[..end]).map_err(|_| PeError::InvalidName(rva))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pe::testimage::ImageBuilder;

    fn sample() -> Vec<u8> {
        let mut builder = ImageBuilder::new();
        builder.descriptor(
            "WS2_32.dll",
            0x400,
            &[Some("socket"), None, Some("WSARecv"), Some("closesocket")],
        );
        builder.descriptor("KERNEL32.dll", 0x800, &[Some("ReadFile"), Some("WSARecv")]);
        builder.image
    }

    #[test]
    fn lists_descriptors_in_order() {
        let image = sample();
        let headers = PeHeaders::parse(&image).unwrap();
        let descriptors = import_descriptors(&image, &headers).unwrap();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].dll, "WS2_32.dll");
        assert_eq!(descriptors[0].first_thunk, 0x500);
        assert_eq!(descriptors[1].dll, "KERNEL32.dll");
    }

    #[test]
    fn finds_slot_in_every_descriptor() {
        let image = sample();
        let headers = PeHeaders::parse(&image).unwrap();
        assert_eq!(
            find_iat_slots(&image, &headers, "WSARecv").unwrap(),
            vec![0x500 + 2 * 8, 0x900 + 8]
        );
        assert_eq!(find_iat_slots(&image, &headers, "ReadFile").unwrap(), vec![0x900]);
    }

    #[test]
    fn missing_symbol_has_no_slots() {
        let image = sample();
        let headers = PeHeaders::parse(&image).unwrap();
        assert!(find_iat_slots(&image, &headers, "recv").unwrap().is_empty());
    }

    #[test]
    fn descriptor_without_name_table_is_skipped() {
        let mut builder = ImageBuilder::new();
        builder.descriptor("WS2_32.dll", 0x400, &[Some("WSARecv")]);
        builder.put_u32(crate::pe::testimage::IMPORT_DIR, 0);
        let headers = PeHeaders::parse(&builder.image).unwrap();
        assert!(find_iat_slots(&builder.image, &headers, "WSARecv")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn image_without_imports() {
        let mut builder = ImageBuilder::new();
        builder.put_u32(crate::pe::testimage::NT + 24 + 120, 0);
        let headers = PeHeaders::parse(&builder.image).unwrap();
        assert!(import_descriptors(&builder.image, &headers).unwrap().is_empty());
    }
}
