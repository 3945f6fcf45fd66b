//! Pushes and pops a frame worth of blocks on both sides of one allocator,
//! then shows what an overrun does to it.
//!
//! Every allocator event down to `trace` level is printed.

use destack::{Allocation, DoubleEndedStack, StackConfig};
use tracing::Level;

fn log_alloc(name: &str, allocation: &Allocation) {
    println!(
        "{name}: {} bytes on the {} side at offset {} ({:p})",
        allocation.size(),
        allocation.side(),
        allocation.offset(),
        allocation.as_ptr()
    );
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(Level::TRACE).init();

    let mut stack = DoubleEndedStack::with_config(1024, StackConfig::debug());

    let a = stack.allocate(32, 4)?;
    log_alloc("a", &a);
    let b = stack.allocate(63, 8)?;
    log_alloc("b", &b);
    let d = stack.allocate_back(32, 4)?;
    log_alloc("d", &d);
    let e = stack.allocate_back(63, 8)?;
    log_alloc("e", &e);

    stack.bytes_mut(&b)?.fill(0xBB);
    println!("usage: {:?}", stack.usage());

    stack.free(b)?;
    let c = stack.allocate(63, 8)?;
    println!("c reused b's address: {}", c.addr() == b.addr());

    // Out of order: refused, nothing changes.
    if let Err(error) = stack.free(a) {
        println!("refused: {error}");
    }

    stack.free(c)?;
    stack.free(a)?;
    stack.free_back(e)?;
    stack.free_back(d)?;
    println!("usage after popping everything: {:?}", stack.usage());

    // Two bytes too many land on the trailing canary.
    let f = stack.allocate(16, 8)?;
    unsafe { f.as_ptr().as_ptr().write_bytes(0xFF, 18) };

    match stack.free(f) {
        Ok(()) => println!("overrun went unnoticed"),
        Err(error) => println!("caught: {error}"),
    }
    println!("state: {:?}, valid: {}", stack.state(), stack.is_valid());

    Ok(())
}
