//! Double-ended stack allocator for frame and scratch memory.
//!
//! One arena, two stacks. The front stack grows from the start of the arena
//! towards its end, the back stack from the end towards the start. Each block
//! is framed by a small header and, optionally, by canaries, so that freeing it
//! can check nobody wrote past its bounds:
//!
//! ```text
//! +---+------+---------+---+-----+------------+---+------+---------+---+
//! | C | Meta | Content | C | ... |    free    | C | Meta | Content | C |
//! +---+------+---------+---+-----+------------+---+------+---------+---+
//!   front stack ----------->                    <----------- back stack
//! ```
//!
//! Blocks are released strictly in LIFO order per side. The first time a
//! release finds a broken canary or an impossible header the allocator turns
//! [`State::Corrupted`] and refuses any further work.
//!
//! The arena is either one heap buffer taken up front or, with
//! [`StackConfig::lazy_growth`], a range of reserved address space whose pages
//! are committed only once one of the stacks reaches them. See [`memory`] for
//! both and for plugging in a custom [`Backing`].

mod allocator;
mod arena;
mod block;
mod config;
mod error;
mod kernel;
pub mod memory;
mod utils;

pub use allocator::{Allocation, DoubleEndedStack, Side, State, Usage};
pub use block::{CANARY, CANARY_SIZE, METADATA_SIZE};
pub use config::StackConfig;
pub use error::{AllocError, Corruption};
pub use memory::{Backing, HeapMemory, Memory, VirtualMemory};
pub use utils::{align, align_down, is_power_of_two};
