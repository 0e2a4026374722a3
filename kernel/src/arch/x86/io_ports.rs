use core::arch::asm;

pub fn inb(port: u16) -> u8 {
    let value;

    unsafe {
        asm!("in al, dx", out("al") value, in("dx") port, options(nomem, nostack, preserves_flags));
    }

    value
}

pub fn outb(port: u16, value: u8) {
    unsafe {
        asm!("out dx, al", in("dx") port, in("al") value, options(nomem, nostack, preserves_flags));
    }
}

/// Byte-wide port access, implemented by the real ports and by test recorders
pub trait PortIo {
    fn read(&mut self, port: u16) -> u8;

    fn write(&mut self, port: u16, value: u8);
}

impl<P: PortIo + ?Sized> PortIo for &mut P {
    fn read(&mut self, port: u16) -> u8 {
        (**self).read(port)
    }

    fn write(&mut self, port: u16, value: u8) {
        (**self).write(port, value)
    }
}

/// The machine's I/O ports
#[derive(Debug, Clone, Copy, Default)]
pub struct Ports;

impl PortIo for Ports {
    fn read(&mut self, port: u16) -> u8 {
        inb(port)
    }

    fn write(&mut self, port: u16, value: u8) {
        outb(port, value)
    }
}

#[cfg(test)]
pub(crate) mod recording {
    use std::collections::{HashMap, VecDeque};

    use super::PortIo;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Access {
        Read(u16),
        Write(u16, u8),
    }

    /// Remembers every access. Reads return the last value written to the port unless a
    /// queued value or a fixed input is set for it.
    #[derive(Debug, Default)]
    pub struct RecordingPorts {
        pub accesses: Vec<Access>,
        pub latched: HashMap<u16, u8>,
        pub inputs: HashMap<u16, VecDeque<u8>>,
    }

    impl RecordingPorts {
        pub fn writes(&self) -> Vec<(u16, u8)> {
            self.accesses
                .iter()
                .filter_map(|access| match *access {
                    Access::Write(port, value) => Some((port, value)),
                    Access::Read(_) => None,
                })
                .collect()
        }

        pub fn writes_to(&self, port: u16) -> Vec<u8> {
            self.writes()
                .into_iter()
                .filter(|&(to, _)| to == port)
                .map(|(_, value)| value)
                .collect()
        }

        /// Queue values returned by the next reads of `port`, oldest first
        pub fn queue(&mut self, port: u16, values: &[u8]) {
            self.inputs.entry(port).or_default().extend(values);
        }
    }

    impl PortIo for RecordingPorts {
        fn read(&mut self, port: u16) -> u8 {
            self.accesses.push(Access::Read(port));

            if let Some(value) = self.inputs.get_mut(&port).and_then(VecDeque::pop_front) {
                return value;
            }

            self.latched.get(&port).copied().unwrap_or(0)
        }

        fn write(&mut self, port: u16, value: u8) {
            self.accesses.push(Access::Write(port, value));
            self.latched.insert(port, value);
        }
    }
}
