//! Executable format detection and DWARF section location
//!
//! Formats are tried in a fixed order (ELF, Mach-O, PE); the first parser
//! that accepts the file wins.
//!
//! | format | where `.debug_info` and friends live                          |
//! |--------|---------------------------------------------------------------|
//! | ELF    | sections named `.debug_*`                                      |
//! | Mach-O | sections named `__debug_*` in the `__DWARF` segment            |
//! | PE     | the byte range between `__start_<name>` and `__stop_<name>`,   |
//! |        | falling back to a section named `<name>`                       |

use std::borrow::Cow;
use std::collections::HashMap;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use gimli::{EndianArcSlice, RunTimeEndian, SectionId};
use object::read::elf::{ElfFile32, ElfFile64};
use object::read::macho::{MachOFile32, MachOFile64};
use object::read::pe::{PeFile32, PeFile64};
use object::{Endianness, Object, ObjectSection, ObjectSymbol, SectionIndex};

use crate::domain::SymbolError;

pub type DwarfReader = EndianArcSlice<RunTimeEndian>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryFormat {
    Elf,
    MachO,
    Pe,
}

impl std::fmt::Display for BinaryFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BinaryFormat::Elf => "ELF",
            BinaryFormat::MachO => "Mach-O",
            BinaryFormat::Pe => "PE",
        })
    }
}

/// Everything the resolver needs from an executable, owned.
pub struct DebugImage {
    pub format: BinaryFormat,
    pub dwarf: gimli::Dwarf<DwarfReader>,
    /// Defined symbols sorted by address.
    pub symbols: Vec<(u64, String)>,
    pub text_range: Option<Range<u64>>,
}

/// Parse `data` read from `path`.
///
/// # Errors
/// [`SymbolError::UnsupportedFormat`] if no parser accepts the file,
/// [`SymbolError::MissingLineTable`] for a PE image without `.debug_info`
/// and [`SymbolError::Dwarf`] for unreadable DWARF.
pub fn parse_image(data: &[u8], path: &Path) -> Result<DebugImage, SymbolError> {
    if let Ok(file) = ElfFile64::<Endianness, &[u8]>::parse(data) {
        return extract(&file, BinaryFormat::Elf, path);
    }
    if let Ok(file) = ElfFile32::<Endianness, &[u8]>::parse(data) {
        return extract(&file, BinaryFormat::Elf, path);
    }
    if let Ok(file) = MachOFile64::<Endianness, &[u8]>::parse(data) {
        return extract(&file, BinaryFormat::MachO, path);
    }
    if let Ok(file) = MachOFile32::<Endianness, &[u8]>::parse(data) {
        return extract(&file, BinaryFormat::MachO, path);
    }
    if let Ok(file) = PeFile64::<&[u8]>::parse(data) {
        return extract(&file, BinaryFormat::Pe, path);
    }
    if let Ok(file) = PeFile32::<&[u8]>::parse(data) {
        return extract(&file, BinaryFormat::Pe, path);
    }
    Err(SymbolError::UnsupportedFormat(path.to_path_buf()))
}

fn extract<'data, O: Object<'data>>(
    obj: &O,
    format: BinaryFormat,
    path: &Path,
) -> Result<DebugImage, SymbolError> {
    let endian = if obj.is_little_endian() { RunTimeEndian::Little } else { RunTimeEndian::Big };
    let markers = Markers::collect(obj);

    if format == BinaryFormat::Pe && section_data(obj, format, &markers, ".debug_info").is_none() {
        return Err(SymbolError::MissingLineTable(path.to_path_buf()));
    }

    let dwarf = gimli::Dwarf::load(|id: SectionId| -> Result<DwarfReader, gimli::Error> {
        let data = section_data(obj, format, &markers, id.name()).unwrap_or(Cow::Borrowed(&[]));
        Ok(EndianArcSlice::new(Arc::from(&*data), endian))
    })?;

    let mut symbols: Vec<(u64, String)> = obj
        .symbols()
        .chain(obj.dynamic_symbols())
        .filter(|s| s.is_definition() && s.address() != 0)
        .filter_map(|s| Some((s.address(), s.name().ok()?.to_string())))
        .filter(|(_, name)| !name.is_empty())
        .collect();
    symbols.sort_unstable();
    symbols.dedup();

    let text_range = [".text", "__text"]
        .iter()
        .find_map(|name| obj.section_by_name(name))
        .map(|s| s.address()..s.address() + s.size());

    Ok(DebugImage { format, dwarf, symbols, text_range })
}

/// Locate one DWARF section by its ELF-style name (`.debug_info`).
fn section_data<'data, O: Object<'data>>(
    obj: &O,
    format: BinaryFormat,
    markers: &Markers,
    name: &str,
) -> Option<Cow<'data, [u8]>> {
    let named = |n: &str| obj.section_by_name(n).and_then(|s| s.uncompressed_data().ok());
    match format {
        BinaryFormat::Elf => named(name),
        BinaryFormat::MachO => named(name).or_else(|| named(&format!("__{}", name.trim_start_matches('.')))),
        BinaryFormat::Pe => markers.bounded(obj, name).map(Cow::Borrowed).or_else(|| named(name)),
    }
}

/// `__start_<name>` / `__stop_<name>` boundary symbols by section name.
#[derive(Default)]
struct Markers {
    start: HashMap<String, (u64, SectionIndex)>,
    stop: HashMap<String, (u64, SectionIndex)>,
}

impl Markers {
    fn collect<'data, O: Object<'data>>(obj: &O) -> Self {
        let mut markers = Markers::default();
        for sym in obj.symbols() {
            let (Ok(name), Some(index)) = (sym.name(), sym.section_index()) else {
                continue;
            };
            if let Some(section) = name.strip_prefix("__start_") {
                markers.start.insert(section.to_string(), (sym.address(), index));
            } else if let Some(section) = name.strip_prefix("__stop_") {
                markers.stop.insert(section.to_string(), (sym.address(), index));
            }
        }
        markers
    }

    /// Bytes between the two markers. Both must exist and share a section.
    fn bounded<'data, O: Object<'data>>(&self, obj: &O, name: &str) -> Option<&'data [u8]> {
        let &(start, start_index) = self.start.get(name)?;
        let &(stop, stop_index) = self.stop.get(name)?;
        if start_index != stop_index {
            log::debug!("{name}: boundary markers are in different sections");
            return None;
        }
        let section = obj.section_by_index(start_index).ok()?;
        let data = section.data().ok()?;

        // Symbol addresses may or may not include the image base.
        let bases = [section.address(), section.address().wrapping_sub(obj.relative_address_base())];
        bases.into_iter().find_map(|base| {
            let lo = usize::try_from(start.checked_sub(base)?).ok()?;
            let hi = usize::try_from(stop.checked_sub(base)?).ok()?;
            (lo <= hi && hi <= data.len()).then(|| &data[lo..hi])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_executable() {
        let err = parse_image(b"definitely not an executable", Path::new("/tmp/x")).err().unwrap();
        assert!(matches!(err, SymbolError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_parses_running_test_binary() {
        let path = std::env::current_exe().unwrap();
        let data = std::fs::read(&path).unwrap();
        let image = parse_image(&data, &path).unwrap();
        if cfg!(target_os = "linux") {
            assert_eq!(image.format, BinaryFormat::Elf);
        }
        assert!(!image.symbols.is_empty());
        assert!(image.symbols.windows(2).all(|w| w[0] <= w[1]));
        assert!(image.text_range.is_some());
    }

    #[test]
    fn test_format_display() {
        assert_eq!(BinaryFormat::MachO.to_string(), "Mach-O");
    }
}
