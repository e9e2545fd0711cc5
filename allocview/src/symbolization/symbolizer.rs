use addr2line::Context;
use parking_lot::Mutex;
use rustc_demangle::demangle;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use allocview_common::Stack;

use super::formats::{parse_image, BinaryFormat, DwarfReader};
use super::offset::AddressCorrection;
use crate::domain::SymbolError;

/// Debug information for one executable plus the session's load offset.
///
/// Lookups take static (offset-corrected) addresses. The addr2line context
/// and the per-address cache sit behind one lock so a table can be shared
/// between the pipeline and the presentation layer.
pub struct SymbolTable {
    path: PathBuf,
    format: BinaryFormat,
    text_range: Option<Range<u64>>,
    symbols: Vec<(u64, String)>,
    correction: AddressCorrection,
    resolver: Mutex<Resolver>,
}

struct Resolver {
    ctx: Context<DwarfReader>,
    /// Cache of resolved frames by address
    cache: HashMap<u64, ResolvedFrame>,
}

impl SymbolTable {
    /// Load debug information from the executable at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not a supported
    /// executable format, or carries unusable DWARF.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SymbolError> {
        let path = path.as_ref();
        let data = fs::read(path)
            .map_err(|source| SymbolError::Read { path: path.to_path_buf(), source })?;

        let image = parse_image(&data, path)?;
        let ctx = Context::from_dwarf(image.dwarf)?;

        Ok(Self {
            path: path.to_path_buf(),
            format: image.format,
            text_range: image.text_range,
            symbols: image.symbols,
            correction: AddressCorrection::IDENTITY,
            resolver: Mutex::new(Resolver { ctx, cache: HashMap::new() }),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn format(&self) -> BinaryFormat {
        self.format
    }

    #[must_use]
    pub fn text_range(&self) -> Option<&Range<u64>> {
        self.text_range.as_ref()
    }

    #[must_use]
    pub fn correction(&self) -> AddressCorrection {
        self.correction
    }

    /// Static address of `name`. Also tries the underscore-prefixed
    /// spelling Mach-O uses for C symbols.
    #[must_use]
    pub fn lookup_symbol(&self, name: &str) -> Option<u64> {
        let underscored = format!("_{name}");
        self.symbols
            .iter()
            .find(|(_, n)| n == name)
            .or_else(|| self.symbols.iter().find(|(_, n)| *n == underscored))
            .map(|&(addr, _)| addr)
    }

    /// Derive the load offset from the anchor's runtime address.
    ///
    /// # Errors
    /// [`SymbolError::AnchorNotFound`] if the executable does not define
    /// `anchor`; the offset stays zero.
    pub fn update_offset(
        &mut self,
        anchor: &str,
        runtime_addr: u64,
    ) -> Result<AddressCorrection, SymbolError> {
        let static_addr =
            self.lookup_symbol(anchor).ok_or_else(|| SymbolError::AnchorNotFound(anchor.to_string()))?;
        self.correction = AddressCorrection::between(static_addr, runtime_addr);
        Ok(self.correction)
    }

    /// Resolve a static address to source location information.
    ///
    /// Uses a cache to avoid re-resolving the same address multiple times.
    pub fn resolve(&self, addr: u64) -> ResolvedFrame {
        let mut resolver = self.resolver.lock();
        if let Some(cached) = resolver.cache.get(&addr) {
            return cached.clone();
        }

        let mut result = Vec::new();
        if let Ok(mut frame_iter) = resolver.ctx.find_frames(addr).skip_all_loads() {
            while let Ok(Some(frame)) = frame_iter.next() {
                let function = frame.function.and_then(|f| f.demangle().ok().map(|s| s.to_string()));

                let location = frame.location.map(|loc| SourceLocation {
                    file: loc.file.map(std::string::ToString::to_string),
                    line: loc.line,
                    column: loc.column,
                });

                result.push(InlinedFrame { function, location });
            }
        }

        // No DWARF function: fall back to the nearest preceding symbol.
        if result.iter().all(|f| f.function.is_none()) {
            if let Some(name) = self.nearest_symbol(addr) {
                match result.first_mut() {
                    Some(first) => first.function = Some(name),
                    None => result.push(InlinedFrame { function: Some(name), location: None }),
                }
            }
        }

        let resolved = ResolvedFrame { addr, frames: result };
        resolver.cache.insert(addr, resolved.clone());
        resolved
    }

    fn nearest_symbol(&self, addr: u64) -> Option<String> {
        let idx = self.symbols.partition_point(|&(a, _)| a <= addr);
        let (_, name) = self.symbols.get(idx.checked_sub(1)?)?;
        Some(Self::demangle_symbol(name))
    }

    /// Look up a return address: the call instruction is the byte before.
    pub fn resolve_return_address(&self, addr: u64) -> ResolvedFrame {
        let mut frame = self.resolve(addr.saturating_sub(1));
        frame.addr = addr;
        frame
    }

    /// One line per frame: `file:line`, or `0x<addr>` when unknown.
    #[must_use]
    pub fn stack_as_string(&self, stack: &Stack) -> String {
        let mut out = String::new();
        for pc in stack.frames() {
            match self.resolve_return_address(pc).file_line() {
                Some(file_line) => out.push_str(&file_line),
                None => {
                    let _ = write!(out, "{pc:#x}");
                }
            }
            out.push('\n');
        }
        out
    }

    /// Demangle a Rust symbol name
    #[must_use]
    pub fn demangle_symbol(symbol: &str) -> String {
        format!("{:#}", demangle(symbol))
    }
}

/// A resolved stack frame (may contain multiple inlined frames)
#[derive(Debug, Clone)]
pub struct ResolvedFrame {
    pub addr: u64,
    /// Innermost first. Empty when nothing is known about the address.
    pub frames: Vec<InlinedFrame>,
}

/// An inlined frame within a resolved frame
#[derive(Debug, Clone)]
pub struct InlinedFrame {
    pub function: Option<String>,
    pub location: Option<SourceLocation>,
}

/// Source code location
#[derive(Debug, Clone)]
pub struct SourceLocation {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl ResolvedFrame {
    /// `file:line` of the innermost frame that has a file.
    #[must_use]
    pub fn file_line(&self) -> Option<String> {
        self.frames.iter().find_map(|f| {
            let loc = f.location.as_ref()?;
            let file = loc.file.as_ref()?;
            Some(match loc.line {
                Some(line) => format!("{file}:{line}"),
                None => file.clone(),
            })
        })
    }

    /// Innermost known function name.
    #[must_use]
    pub fn function(&self) -> Option<&str> {
        self.frames.iter().find_map(|f| f.function.as_deref())
    }
}
