use allocview::symbolization::{AddressCorrection, BinaryFormat, SymbolTable};

#[test]
fn test_symbol_table_loads_demo_binary() {
    let binary_path = env!("CARGO_BIN_EXE_allocview-demo");

    println!("Loading symbols from: {binary_path}");

    let table = SymbolTable::load(binary_path);
    assert!(table.is_ok(), "Failed to load symbol table: {:?}", table.err());

    let table = table.unwrap();
    if cfg!(target_os = "linux") {
        assert_eq!(table.format(), BinaryFormat::Elf);
    }
    assert!(table.text_range().is_some(), "no executable section found");
}

#[test]
fn test_anchor_found_and_resolved() {
    let binary_path = env!("CARGO_BIN_EXE_allocview-demo");
    let (anchor_name, _) = allocview_agent::anchor();

    let table = SymbolTable::load(binary_path).expect("Failed to load symbol table");
    let static_addr = table
        .lookup_symbol(anchor_name)
        .unwrap_or_else(|| panic!("{anchor_name} not found in {binary_path}"));
    println!("{anchor_name} @ {static_addr:#x}");

    if let Some(text) = table.text_range() {
        assert!(text.contains(&static_addr), "anchor outside text section");
    }

    let resolved = table.resolve(static_addr);
    let function = resolved.function().expect("anchor should resolve to a function");
    assert!(function.contains(anchor_name), "resolved to {function}");
}

#[test]
fn test_load_offset_translates_runtime_frames() {
    let binary_path = env!("CARGO_BIN_EXE_allocview-demo");
    let (anchor_name, _) = allocview_agent::anchor();
    let mut table = SymbolTable::load(binary_path).expect("Failed to load symbol table");
    let static_addr = table.lookup_symbol(anchor_name).expect("anchor present");

    // Pretend the image was loaded 0x5555_0000_0000 higher
    let runtime_addr = static_addr + 0x5555_0000_0000;
    let correction = table.update_offset(anchor_name, runtime_addr).unwrap();

    assert_eq!(correction, AddressCorrection::between(static_addr, runtime_addr));
    assert_eq!(correction.offset(), -0x5555_0000_0000);
    assert_eq!(correction.apply(runtime_addr + 0x10), static_addr + 0x10);
}
