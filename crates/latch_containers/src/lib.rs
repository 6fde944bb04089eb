//! Latch Containers
//!
//! Allocator-aware collections used by component storage:
//! - Allocators (heap, stack bump, tracking)
//! - Growable `Array` and block-based `Deque`
//! - Fixed-capacity `RingBuffer`
//! - Struct-of-arrays `MultiArrayBuffer` and `InstanceTable`
//! - Open-addressing `HashMap`

pub mod alloc;
pub mod array;
pub mod config;
pub mod deque;
pub mod error;
pub mod hash_map;
pub mod instance_table;
pub mod multi_array;
pub mod ring_buffer;

pub use alloc::{Allocator, HeapAllocator, StackAllocator, StackBuffer, TrackingAllocator, HEAP};
pub use array::Array;
pub use config::Settings;
pub use deque::Deque;
pub use error::{AllocError, ContainerError};
pub use hash_map::{DefaultHashBuilder, HashMap};
pub use instance_table::{Instance, InstanceTable};
pub use multi_array::{ColumnAt, Columns, MultiArrayBuffer, CAPACITY_ALIGNMENT};
pub use ring_buffer::RingBuffer;

pub use bytemuck;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
