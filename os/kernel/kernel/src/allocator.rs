//! # Kernel Global Allocator
//!
//! Installs [`KernelAllocator`], which forwards every request to the kernel
//! heap in `kernel-alloc`. Allocation failures surface as null pointers, so
//! `alloc` collections report them through the default allocation error
//! handler.

use kernel_alloc::KernelAllocator;

/// The installed global allocator instance.
#[global_allocator]
static GLOBAL_ALLOCATOR: KernelAllocator = KernelAllocator;
