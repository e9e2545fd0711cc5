//! Anchor symbol
//!
//! A function with a fixed, unmangled name whose runtime address is reported
//! in the handshake. The collector looks up the same name in the executable's
//! symbol table; the difference between the two addresses is the load offset
//! applied to every captured frame.

/// Linked name of [`allocview_anchor`].
pub const ANCHOR_NAME: &str = "allocview_anchor";

/// Never called for its behavior; only its address matters.
#[allow(unsafe_code)] // no_mangle: the collector resolves this exact name
#[no_mangle]
#[inline(never)]
pub extern "C" fn allocview_anchor() {
    std::hint::black_box(());
}

/// Name and runtime address of the anchor.
#[must_use]
pub fn anchor() -> (&'static str, u64) {
    let f: extern "C" fn() = allocview_anchor;
    (ANCHOR_NAME, f as usize as u64)
}
