use rand::Rng;

use super::{Platform, WindowHandle};
use crate::fakes::generation_color;
use crate::input::InputFault;
use crate::logger;
use crate::types::*;
use crate::vision::CaptureError;

/// In-process fake game: every input that lands repaints the whole window.
#[derive(Debug, Default, Clone, Copy)]
pub struct StubPlatform {
    miss_rate: f64,
}

impl StubPlatform {
    /// Inputs are silently dropped with probability `miss_rate`, so runs
    /// against the stub exercise the retry path.
    pub fn flaky(miss_rate: f64) -> Self {
        Self { miss_rate: miss_rate.clamp(0.0, 1.0) }
    }
}

impl Platform for StubPlatform {
    fn find_windows(&self, pattern: &str) -> Vec<(WindowId, String)> {
        logger::info_p("stub", &format!("find_windows(\"{}\")", pattern));
        vec![(30001, format!("Stub<{}>", pattern))]
    }

    fn open_window(&self, window_id: WindowId) -> Box<dyn WindowHandle> {
        logger::info_p("stub", &format!("open_window({})", window_id));
        Box::new(StubWindow {
            window_id,
            title: format!("Stub-{}", window_id),
            bounds: WindowBounds { x: 0, y: 0, w: 1920, h: 1080 },
            generation: 0,
            miss_rate: self.miss_rate,
        })
    }
}

struct StubWindow {
    window_id: WindowId,
    title: String,
    bounds: WindowBounds,
    generation: u64,
    miss_rate: f64,
}

impl StubWindow {
    fn land(&mut self, what: &str) {
        if self.miss_rate > 0.0 && rand::thread_rng().gen_bool(self.miss_rate) {
            logger::info_p("stub", &format!("{} dropped", what));
            return;
        }
        self.generation += 1;
        logger::info_p("stub", &format!("{} (frame {})", what, self.generation));
    }
}

impl WindowHandle for StubWindow {
    fn id(&self) -> WindowId {
        self.window_id
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn bounds(&self) -> Option<WindowBounds> {
        Some(self.bounds)
    }

    fn refresh(&mut self) {}

    fn activate(&mut self) {
        logger::info_p("stub", &format!("win({}).activate()", self.window_id));
    }

    fn click_at(&mut self, p: Point) -> Result<(), InputFault> {
        if p.x < 0 || p.y < 0 || p.x >= self.bounds.w || p.y >= self.bounds.h {
            return Err(InputFault::Click(p, "outside the window".into()));
        }
        self.land(&format!("click {}", p));
        Ok(())
    }

    fn tap(&mut self, key: &str) -> Result<(), InputFault> {
        self.land(&format!("tap \"{}\"", key));
        Ok(())
    }

    fn capture(&mut self, rect: Region) -> Result<Capture, CaptureError> {
        if rect.r > self.bounds.w || rect.b > self.bounds.h {
            return Err(CaptureError::Unavailable { region: rect, reason: "outside the window".into() });
        }
        Ok(Capture::filled(rect, generation_color(self.generation)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_change_only_when_input_lands() {
        let mut win = StubPlatform::default().open_window(1);
        let r = Region::from_size(0, 0, 4, 4);
        let a = win.capture(r).unwrap();
        let b = win.capture(r).unwrap();
        assert_eq!(a.data, b.data);
        win.tap("q").unwrap();
        let c = win.capture(r).unwrap();
        assert_ne!(a.data, c.data);
    }

    #[test]
    fn fully_flaky_stub_never_changes() {
        let mut win = StubPlatform::flaky(1.0).open_window(1);
        let r = Region::from_size(0, 0, 4, 4);
        let a = win.capture(r).unwrap();
        win.click_at(Point::new(1, 1)).unwrap();
        assert_eq!(a.data, win.capture(r).unwrap().data);
    }

    #[test]
    fn out_of_window_input_is_a_fault() {
        let mut win = StubPlatform::default().open_window(1);
        assert!(win.click_at(Point::new(5000, 5)).is_err());
        assert!(win.capture(Region::from_size(1900, 0, 100, 10)).is_err());
    }
}
