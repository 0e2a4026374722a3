#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub mod x86;
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub use x86::*;

pub fn halt() -> ! {
    loop {
        interrupts::wait_for_interrupts();
    }
}
