//! # Kernel Configuration
//!
//! This crate is the single source of build-time configuration for the
//! kernel: where the image is loaded, how large the boot stack and the
//! kernel heap are, and the granularities the heap allocator works with.
//! Nothing here is decided at runtime; every value is a `const` and the
//! relationships between them are checked at compile time.
//!
//! ## Modules
//!
//! ### Memory Layout ([`memory`])
//! Physical placement of the kernel image and its static regions:
//! * **Load Address**: where the firmware places the kernel image
//! * **Page Size**: the granule the page provider hands out
//! * **Boot Stack**: size of the stack used until a scheduler exists
//! * **Kernel Heap**: size of the statically reserved heap backing store
//!
//! ### Heap Tunables ([`heap`])
//! The three granularities of the kernel heap allocator:
//! * **`MIN_ALLOC_SIZE`**: rounding and alignment unit of every chunk
//! * **`MIN_SPLIT_SIZE`**: smallest leftover worth keeping as a free chunk
//! * **`BLOCK_SIZE`**: unit in which the heap asks for more pages
//!
//! ## Physical Memory Layout
//!
//! ```text
//! 0x0000_0000  ┌─────────────────────────────────┐
//!              │  Firmware / spin tables         │
//! KERNEL_LOAD  ├─────────────────────────────────┤ 0x0008_0000
//!              │  Kernel Image (text, data)      │
//!              ├─────────────────────────────────┤
//!              │  .heap (KERNEL_HEAP_SIZE)       │
//!              ├─────────────────────────────────┤
//!              │  .bss (boot stack)              │
//!              ├─────────────────────────────────┤
//!              │  Unused RAM                     │
//!              └─────────────────────────────────┘
//! ```
//!
//! ## Build Integration
//! ```rust
//! // In build.rs
//! use kernel_info::memory::KERNEL_LOAD;
//!
//! println!("cargo:rustc-link-arg=--defsym=KERNEL_LOAD={:#x}", KERNEL_LOAD);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod heap;
pub mod memory;
