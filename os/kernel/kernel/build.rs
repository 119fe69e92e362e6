use kernel_info::memory;
use std::{env, path::PathBuf};

fn main() {
    // Point to the linker script
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let ld = manifest_dir.join("kernel.ld");

    // Sanity checks (fail fast during build)
    let kernel_load = memory::KERNEL_LOAD;
    assert_eq!(
        kernel_load & 0xfff,
        0,
        "KERNEL_LOAD must be 4 KiB aligned (got {kernel_load:#x})"
    );

    // Rebuild when inputs change
    println!("cargo:rerun-if-changed={}", ld.display());

    // Linker script
    println!("cargo:rustc-link-arg-bins=-T{}", ld.display());

    // Provide symbols to the linker script
    println!("cargo:rustc-link-arg-bins=--defsym=KERNEL_LOAD={kernel_load:#x}");
}
