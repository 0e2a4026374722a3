use core::fmt::{self, Write};

#[cfg(target_os = "none")]
use lazy_static::lazy_static;
use spin::Mutex;

use crate::arch::io_ports::PortIo;

pub const WIDTH: usize = 80;
pub const HEIGHT: usize = 25;

/// Physical address of the colour text mode buffer
pub const BUFFER_ADDRESS: usize = 0xb8000;

/// Light grey on black
const ATTRIBUTE: u16 = 0x07 << 8;
const BLANK: u16 = ATTRIBUTE | b' ' as u16;

const CRTC_INDEX_PORT: u16 = 0x3D4;
const CRTC_DATA_PORT: u16 = 0x3D5;
const CURSOR_LOCATION_HIGH: u8 = 0x0E;
const CURSOR_LOCATION_LOW: u8 = 0x0F;

/// Text console over a `WIDTH` x `HEIGHT` grid of character cells
pub struct Console<'a, P: PortIo> {
    cells: &'a mut [u16],
    ports: P,
    x: usize,
    y: usize,
}

impl<'a, P: PortIo> Console<'a, P> {
    pub fn new(cells: &'a mut [u16], ports: P) -> Self {
        assert!(cells.len() >= WIDTH * HEIGHT, "console buffer is too small");

        Self {
            cells,
            ports,
            x: 0,
            y: 0,
        }
    }

    /// A console that starts on the bottom row and leaves the rest of the screen as it is
    pub fn last_row(cells: &'a mut [u16], ports: P) -> Self {
        let mut console = Self::new(cells, ports);
        console.y = HEIGHT - 1;

        console
    }

    pub fn cursor(&self) -> (usize, usize) {
        (self.x, self.y)
    }

    pub fn clear(&mut self) {
        self.cells[..WIDTH * HEIGHT].fill(BLANK);

        self.x = 0;
        self.y = 0;

        self.update_cursor();
    }

    fn new_line(&mut self) {
        self.x = 0;
        self.y += 1;

        if self.y >= HEIGHT {
            self.cells.copy_within(WIDTH..WIDTH * HEIGHT, 0);
            self.cells[(HEIGHT - 1) * WIDTH..WIDTH * HEIGHT].fill(BLANK);

            self.y = HEIGHT - 1;
        }
    }

    pub fn put_byte(&mut self, byte: u8) {
        if byte == b'\n' {
            self.new_line();
            return;
        }

        self.cells[self.y * WIDTH + self.x] = ATTRIBUTE | byte as u16;
        self.x += 1;

        if self.x >= WIDTH {
            self.new_line();
        }
    }

    fn update_cursor(&mut self) {
        let position = (self.y * WIDTH + self.x) as u16;

        self.ports.write(CRTC_INDEX_PORT, CURSOR_LOCATION_LOW);
        self.ports.write(CRTC_DATA_PORT, position as u8);
        self.ports.write(CRTC_INDEX_PORT, CURSOR_LOCATION_HIGH);
        self.ports.write(CRTC_DATA_PORT, (position >> 8) as u8);
    }
}

impl<P: PortIo> Write for Console<'_, P> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for ch in s.chars() {
            // Code page 437 has no glyph for anything outside ascii, use a filled square
            self.put_byte(if ch.is_ascii() { ch as u8 } else { 0xfe });
        }

        self.update_cursor();

        Ok(())
    }
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {{
        $crate::console::_print(core::format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! println {
    () => {
        $crate::print!("\n");
    };

    ($($arg:tt)*) => {{
        $crate::console::_print(core::format_args!($($arg)*));
        $crate::print!("\n");
    }};
}

#[cfg(target_os = "none")]
unsafe fn screen() -> &'static mut [u16] {
    unsafe { core::slice::from_raw_parts_mut(BUFFER_ADDRESS as *mut u16, WIDTH * HEIGHT) }
}

#[cfg(target_os = "none")]
lazy_static! {
    pub static ref CONSOLE: Mutex<Console<'static, crate::arch::io_ports::Ports>> = {
        let mut console = Console::new(unsafe { screen() }, crate::arch::io_ports::Ports);
        console.clear();

        Mutex::new(console)
    };
}

/// Messages from different cores may interleave, but never within one `print!`
#[cfg(target_os = "none")]
pub fn _print(args: fmt::Arguments) {
    crate::arch::interrupts::without_interrupts(|| {
        let _ = CONSOLE.lock().write_fmt(args);
    });
}

/// Host builds have no screen
#[cfg(not(target_os = "none"))]
pub fn _print(_args: fmt::Arguments) {}

/// Write through `console` if nobody holds it, otherwise through the console `fallback`
/// builds. Never waits for the lock.
pub fn print_or_fallback<'b, P: PortIo, Q: PortIo>(
    console: &Mutex<Console<'_, P>>,
    fallback: impl FnOnce() -> Console<'b, Q>,
    args: fmt::Arguments,
) {
    match console.try_lock() {
        Some(mut console) => {
            let _ = console.write_fmt(args);
        }
        None => {
            let _ = fallback().write_fmt(args);
        }
    }
}

/// Output for a core that may have stopped with the console lock held, by itself or by
/// another core that will never release it
#[cfg(target_os = "none")]
pub fn _print_panic(args: fmt::Arguments) {
    print_or_fallback(
        &*CONSOLE,
        || Console::last_row(unsafe { screen() }, crate::arch::io_ports::Ports),
        args,
    );
}
