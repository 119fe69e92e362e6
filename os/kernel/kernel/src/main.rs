//! # Kernel Entry Point

#![no_std]
#![no_main]
#![allow(unsafe_code)]

extern crate alloc;

mod allocator;

use alloc::boxed::Box;
use alloc::vec::Vec;
use kernel_alloc::kernel_heap;
use kernel_info::memory::BOOT_STACK_SIZE;

#[cfg(not(target_arch = "aarch64"))]
compile_error!("the kernel image is built for aarch64 only");

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("kernel panic: {info}");
    halt()
}

/// 16-byte aligned stack
#[repr(align(16))]
struct Aligned<const N: usize>([u8; N]);

#[unsafe(link_section = ".bss.boot")]
#[unsafe(no_mangle)]
static mut BOOT_STACK: Aligned<BOOT_STACK_SIZE> = Aligned([0; BOOT_STACK_SIZE]);

/// The kernel entry point
///
/// The firmware starts every core here with the MMU off and interrupts
/// masked. All cores but core 0 are parked; core 0 switches to
/// [`BOOT_STACK`], clears `.bss` and calls [`kernel_main`].
///
/// # Naked function & Stack
/// There is no usable stack on entry, so the compiler must not emit a
/// prologue.
#[unsafe(no_mangle)]
#[unsafe(naked)]
#[unsafe(link_section = ".text.boot")]
pub extern "C" fn _start() -> ! {
    core::arch::naked_asm!(
        "mrs    x1, mpidr_el1",
        "and    x1, x1, #3",
        "cbz    x1, 2f",
        // Secondary cores
        "1:",
        "wfe",
        "b      1b",

        "2:",
        "adrp   x1, {stack}",
        "add    x1, x1, :lo12:{stack}",
        "ldr    x2, ={stack_size}",
        "add    sp, x1, x2",

        // Clear .bss (the boot stack lives there, but nothing is on it yet)
        "ldr    x1, =__bss_start",
        "ldr    x2, =__bss_end",
        "3:",
        "cmp    x1, x2",
        "b.hs   4f",
        "str    xzr, [x1], #8",
        "b      3b",

        "4:",
        "bl     {main}",
        "b      1b",
        stack = sym BOOT_STACK,
        stack_size = const BOOT_STACK_SIZE,
        main = sym kernel_main,
    );
}

extern "C" fn kernel_main() -> ! {
    let answer = Box::new(42_u64);
    let mut multiples: Vec<u32> = (0..1024).collect();
    multiples.retain(|n| n % 3 == 0);
    log::info!("{} multiples of three, answer {answer}", multiples.len());
    drop(multiples);
    drop(answer);

    if let Err(e) = kernel_heap().check() {
        panic!("kernel heap corrupted: {e}");
    }
    let stats = kernel_heap().stats();
    log::info!(
        "heap: {} live allocations, {} bytes in use, {} bytes free in {} chunks",
        stats.live_allocations,
        stats.in_use_bytes,
        stats.free_bytes,
        stats.free_chunks
    );

    halt()
}

fn halt() -> ! {
    loop {
        // Safety: waiting for an event has no side effects.
        unsafe { core::arch::asm!("wfe", options(nomem, nostack, preserves_flags)) };
    }
}
