//! # Memory Layout

/// Physical address the firmware loads the kernel image to.
///
/// # Kernel Build
/// This information is sourced in the kernel's `build.rs` to configure
/// the linker.
pub const KERNEL_LOAD: u64 = 0x0008_0000;

/// Granule of the page provider backing the kernel heap.
pub const PAGE_SIZE: usize = 4096;

/// The size of the boot stack in debug builds.
#[cfg(debug_assertions)]
pub const BOOT_STACK_SIZE: usize = 128 * 1024;

/// The size of the boot stack in release builds.
#[cfg(not(debug_assertions))]
pub const BOOT_STACK_SIZE: usize = 64 * 1024;

/// Size of the statically reserved region the kernel heap grows into.
pub const KERNEL_HEAP_SIZE: usize = 16 * 1024 * 1024; // 16 MiB

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(BOOT_STACK_SIZE.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_HEAP_SIZE.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_LOAD.is_multiple_of(PAGE_SIZE as u64));
};
