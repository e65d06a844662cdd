// Build script for geobind-ffi
//
// Generates the C type declarations (error struct, error codes, callback
// typedefs) into $OUT_DIR/geobind_types.h. cbindgen 0.27 does not recognize
// Rust 2024's #[unsafe(no_mangle)] attribute, so exported functions are left
// out; their C declarations live in the doc comments of src/api/.
//
// A failed generation only prints a warning; the library still builds.

use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=src/");

    let (Ok(crate_dir), Ok(out_dir)) = (env::var("CARGO_MANIFEST_DIR"), env::var("OUT_DIR")) else {
        return;
    };
    let header = PathBuf::from(out_dir).join("geobind_types.h");

    match cbindgen::Builder::new()
        .with_crate(crate_dir)
        .with_language(cbindgen::Language::C)
        .with_include_guard("GEOBIND_TYPES_H")
        .with_no_includes()
        .with_sys_include("stdbool.h")
        .with_sys_include("stddef.h")
        .with_sys_include("stdint.h")
        .generate()
    {
        Ok(bindings) => {
            bindings.write_to_file(&header);
        }
        Err(e) => println!("cargo:warning=geobind_types.h not generated: {e}"),
    }
}
