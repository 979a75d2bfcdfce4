//! # Kernel Configuration
//!
//! Build-time constants shared by the memory subsystem: where the heap and
//! its entry table live, where the kernel is loaded, and the block/page
//! granularity everything else is derived from.

#![cfg_attr(not(test), no_std)]

pub mod memory;
