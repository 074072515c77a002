use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Window identifier (CGWindowID on macOS)
pub type WindowId = u64;

/// A point in window-client pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Rectangle in window-client pixels, top-left inclusive, bottom-right exclusive.
///
/// Immutable once built; `new` normalises swapped corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub l: i32,
    pub t: i32,
    pub r: i32,
    pub b: i32,
}

impl Region {
    pub fn new(l: i32, t: i32, r: i32, b: i32) -> Self {
        Self {
            l: l.min(r),
            t: t.min(b),
            r: l.max(r),
            b: t.max(b),
        }
    }

    /// Rectangle of `w`x`h` pixels whose top-left corner is (`l`, `t`).
    pub fn from_size(l: i32, t: i32, w: i32, h: i32) -> Self {
        Self::new(l, t, l + w.max(0), t + h.max(0))
    }

    /// Rectangle centered on `p`, clamped so it never goes left of or above the origin.
    pub fn centered(p: Point, half_w: i32, half_h: i32) -> Self {
        let l = (p.x - half_w).max(0);
        let t = (p.y - half_h).max(0);
        Self::new(l, t, (p.x + half_w).max(l), (p.y + half_h).max(t))
    }

    pub fn width(&self) -> i32 {
        self.r - self.l
    }

    pub fn height(&self) -> i32 {
        self.b - self.t
    }

    pub fn center(&self) -> Point {
        Point::new(self.l + self.width() / 2, self.t + self.height() / 2)
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{} {}x{}]", self.l, self.t, self.width(), self.height())
    }
}

/// Screen-coordinate bounds of the game window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowBounds {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

/// Raw screenshot pixel data (BGRA) for one region at one instant.
pub struct Capture {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: u32,
    pub region: Region,
    pub taken_at: DateTime<Local>,
}

impl Capture {
    /// Tightly packed BGRA buffer.
    pub fn from_bgra(region: Region, width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            data,
            width,
            height,
            bytes_per_row: width * 4,
            region,
            taken_at: Local::now(),
        }
    }

    /// Solid-colour capture, used by the stub platform and tests.
    pub fn filled(region: Region, bgra: [u8; 4]) -> Self {
        let width = region.width().max(0) as u32;
        let height = region.height().max(0) as u32;
        let data = bgra.repeat((width * height) as usize);
        Self::from_bgra(region, width, height, data)
    }

    /// (b, g, r) of the pixel at (`x`, `y`).
    pub fn bgr(&self, x: u32, y: u32) -> (u8, u8, u8) {
        let idx = (y * self.bytes_per_row + x * 4) as usize;
        (self.data[idx], self.data[idx + 1], self.data[idx + 2])
    }

    pub fn set_bgr(&mut self, x: u32, y: u32, bgr: (u8, u8, u8)) {
        let idx = (y * self.bytes_per_row + x * 4) as usize;
        self.data[idx] = bgr.0;
        self.data[idx + 1] = bgr.1;
        self.data[idx + 2] = bgr.2;
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Debug for Capture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capture")
            .field("region", &self.region)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("taken_at", &self.taken_at)
            .finish()
    }
}

/// Command from TUI to the session thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start(usize),
    Abort,
    Quit,
}

/// Lifecycle of the session thread, shown in the TUI banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// A start was requested and the session thread has not begun the run yet.
    Starting,
    Running,
    Aborting,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centered_region_is_clamped_at_origin() {
        let r = Region::centered(Point::new(10, 5), 20, 20);
        assert_eq!(r.l, 0);
        assert_eq!(r.t, 0);
        assert_eq!(r.r, 30);
        assert_eq!(r.b, 25);
    }

    #[test]
    fn swapped_corners_are_normalised() {
        let r = Region::new(50, 60, 10, 20);
        assert_eq!((r.l, r.t, r.width(), r.height()), (10, 20, 40, 40));
        assert_eq!(r.center(), Point::new(30, 40));
    }

    #[test]
    fn filled_capture_has_region_dimensions() {
        let cap = Capture::filled(Region::from_size(0, 0, 3, 2), [1, 2, 3, 255]);
        assert_eq!(cap.width, 3);
        assert_eq!(cap.height, 2);
        assert_eq!(cap.bgr(2, 1), (1, 2, 3));
        assert_eq!(cap.pixel_count(), 6);
    }
}
