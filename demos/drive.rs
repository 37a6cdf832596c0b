//! A runnable walkthrough of the public API, mirroring the original
//! system's own demonstration program: allocate a handful of virtual
//! addresses, write through a translated pointer, print stats, then
//! free and re-allocate a segment.
use mems::Mems;

fn main() {
    env_logger::init();

    let mut mems = Mems::init();
    let mut ptrs: Vec<usize> = Vec::with_capacity(10);

    println!("\n------- Allocating virtual addresses [malloc] -------");
    for i in 0..10 {
        match mems.malloc(std::mem::size_of::<i32>() * 250) {
            Ok(handle) => {
                println!("Virtual address for ptr[{}]: {}", i, handle);
                ptrs.push(handle);
            }
            Err(e) => println!("ptr[{}] allocation failed: {}", i, e),
        }
    }

    println!("\n------ Accessing and writing to a virtual address [translate] -----");
    let element_size = std::mem::size_of::<i32>();
    let phys_1 = mems
        .translate(ptrs[0] + element_size)
        .expect("address should be live");
    unsafe {
        *(phys_1 as *mut i32) = 200;
    }

    let phys_0 = mems.translate(ptrs[0]).expect("address should be live");
    println!(
        "Virtual base address: {}\tPhysical base address: {:#x}",
        ptrs[0], phys_0
    );
    let value_at_1 = unsafe { *((phys_0 + element_size) as *const i32) };
    println!("Value at index [1]: {}", value_at_1);

    println!("\n--------- Printing memory stats [print_stats] --------");
    mems.print_stats();

    println!("\n--------- Freeing and re-allocating a segment [free] --------");
    println!("Freeing ptr[3]...");
    mems.free(ptrs[3]).expect("ptr[3] should be live");
    mems.print_stats();

    println!("\nRe-allocating space for ptr[3]...");
    ptrs[3] = mems
        .malloc(element_size * 250)
        .expect("reallocation should succeed");
    mems.print_stats();

    println!("\n--------- Releasing all memory [finish] --------\n");
    mems.finish();
}
