//! # Symbol Resolution and Address Translation
//!
//! Converts the raw return addresses captured by the agent into source
//! locations and function names using the monitored executable's DWARF
//! debug information.
//!
//! ## Address Translation
//!
//! The agent runs inside a relocated image (PIE/ASLR), so captured frames
//! are runtime addresses while DWARF uses link-time addresses. The handshake
//! carries the runtime address of a known anchor symbol; looking the same
//! name up in the executable gives the static address and therefore one
//! offset for the whole session (see [`offset`]):
//!
//! ```text
//! 1. Handshake:   allocview_anchor @ 0x55f3a2b4c780 (runtime)
//! 2. Symbol table: allocview_anchor @ 0x0000000c780 (static)
//! 3. offset = static - runtime
//! 4. every frame: corrected = frame + offset
//! 5. lookup(corrected - 1) -> file:line, function
//! ```
//!
//! ## Executable Formats
//!
//! ELF, Mach-O and PE are tried in that order (see [`formats`]). DWARF is
//! parsed with `gimli` and queried through `addr2line`; Rust names are
//! demangled with `rustc-demangle`.
//!
//! ## Degradation
//!
//! Symbolization is optional for a session. If the executable cannot be
//! loaded, [`Symbols`] stays empty: the offset is zero, stacks print as hex
//! and function lookups answer `"unknown"`.
//!
//! ## Module Structure
//!
//! - **`symbolizer`**: [`SymbolTable`], DWARF lookups with a per-address cache
//! - **`formats`**: format detection and DWARF section location
//! - **`offset`**: [`AddressCorrection`]

pub mod formats;
pub mod offset;
pub mod symbolizer;

use std::sync::Arc;

use allocview_common::{HandshakeMessage, Stack};
use log::{info, warn};

pub use formats::BinaryFormat;
pub use offset::AddressCorrection;
pub use symbolizer::{ResolvedFrame, SymbolTable};

/// Shared, possibly empty, handle on a session's symbol table.
#[derive(Clone, Default)]
pub struct Symbols {
    table: Option<Arc<SymbolTable>>,
}

impl Symbols {
    /// No debug information: hex addresses only.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_table(table: SymbolTable) -> Self {
        Self { table: Some(Arc::new(table)) }
    }

    /// Load the executable named in the handshake and derive the offset from
    /// its anchor. Failures are logged and leave symbolization degraded.
    #[must_use]
    pub fn for_handshake(hello: &HandshakeMessage) -> Self {
        let mut table = match SymbolTable::load(&hello.exe_path) {
            Ok(table) => table,
            Err(e) => {
                warn!("symbolization disabled: {e}");
                return Self::none();
            }
        };

        match table.update_offset(&hello.anchor_symbol_name, hello.anchor_runtime_address) {
            Ok(correction) => info!(
                "loaded {} symbols from {}, offset {:#x}",
                table.format(),
                hello.exe_path,
                correction.offset()
            ),
            Err(e) => warn!("{e}; addresses will not be corrected"),
        }
        Self::from_table(table)
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.table.is_some()
    }

    #[must_use]
    pub fn table(&self) -> Option<&SymbolTable> {
        self.table.as_deref()
    }

    #[must_use]
    pub fn correction(&self) -> AddressCorrection {
        self.table.as_ref().map_or(AddressCorrection::IDENTITY, |t| t.correction())
    }

    /// One line per frame: `file:line`, or `0x<addr>` when unknown.
    #[must_use]
    pub fn stack_as_string(&self, stack: &Stack) -> String {
        match &self.table {
            Some(table) => table.stack_as_string(stack),
            None => stack.frames().map(|pc| format!("{pc:#x}\n")).collect(),
        }
    }

    /// Function containing the return address `pc`, or `"unknown"`.
    #[must_use]
    pub fn function_name(&self, pc: u64) -> String {
        self.table
            .as_ref()
            .and_then(|t| t.resolve_return_address(pc).function().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Source location of the return address `pc`, or `"unknown"`.
    #[must_use]
    pub fn location(&self, pc: u64) -> String {
        self.table
            .as_ref()
            .and_then(|t| t.resolve_return_address(pc).file_line())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_symbols_print_hex() {
        let symbols = Symbols::none();
        let stack = Stack::from_frames(&[0x1010, 0x2abc]);
        assert_eq!(symbols.stack_as_string(&stack), "0x1010\n0x2abc\n");
        assert_eq!(symbols.function_name(0x1010), "unknown");
        assert_eq!(symbols.location(0x1010), "unknown");
        assert_eq!(symbols.correction(), AddressCorrection::IDENTITY);
    }

    #[test]
    fn test_handshake_with_missing_exe_degrades() {
        let symbols = Symbols::for_handshake(&HandshakeMessage {
            exe_path: "/nonexistent/app".to_string(),
            anchor_symbol_name: "allocview_anchor".to_string(),
            anchor_runtime_address: 0x5000,
        });
        assert!(!symbols.is_loaded());
        assert_eq!(symbols.correction().offset(), 0);
    }
}
