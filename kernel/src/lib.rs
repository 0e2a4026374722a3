#![feature(abi_x86_interrupt)]
#![cfg_attr(not(test), no_std)]

#[macro_use]
pub mod console;

pub mod arch;
pub mod mp;
pub mod panic;
