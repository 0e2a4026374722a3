use core::arch::asm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ModelSpecificRegister {
    ApicBase = 0x0000_001B,
}

impl ModelSpecificRegister {
    pub fn read(self) -> u64 {
        let value_low: u32;
        let value_high: u32;

        unsafe {
            asm!(
                "rdmsr",
                in("ecx") self as u32,
                out("eax") value_low,
                out("edx") value_high,
                options(nomem, nostack, preserves_flags)
            );
        }

        ((value_high as u64) << 32) | (value_low as u64)
    }

    pub fn write(self, value: u64) {
        let value_low = value as u32;
        let value_high = (value >> 32) as u32;

        unsafe {
            asm!(
                "wrmsr",
                in("ecx") self as u32,
                in("eax") value_low,
                in("edx") value_high,
                options(nostack, preserves_flags)
            );
        }
    }
}
