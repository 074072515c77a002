pub mod hotkey;
pub mod stub;

#[cfg(target_os = "macos")]
pub mod darwin;

use std::cell::RefCell;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use crate::clock;
use crate::input::{InputFault, InputRequest, InputSimulator, InputStep};
use crate::logger;
use crate::types::*;
use crate::vision::{CaptureError, RegionCapture};

/// Handle to one OS window. Coordinates are window-relative pixels.
pub trait WindowHandle: Send {
    fn id(&self) -> WindowId;
    fn title(&self) -> &str;
    fn bounds(&self) -> Option<WindowBounds>;
    fn refresh(&mut self);
    fn activate(&mut self);
    fn click_at(&mut self, p: Point) -> Result<(), InputFault>;
    /// `key` may carry modifiers: `cmd+a`, `shift+up`.
    fn tap(&mut self, key: &str) -> Result<(), InputFault>;
    fn capture(&mut self, rect: Region) -> Result<Capture, CaptureError>;
}

/// Window enumeration and handle factory.
pub trait Platform: Send {
    fn find_windows(&self, pattern: &str) -> Vec<(WindowId, String)>;
    fn open_window(&self, window_id: WindowId) -> Box<dyn WindowHandle>;
}

/// Create the platform appropriate for the current OS.
pub fn create_platform(force_stub: bool) -> Box<dyn Platform> {
    if force_stub {
        logger::register_prefix("stub", logger::COLOR_GRAY);
        return Box::new(stub::StubPlatform::flaky(0.1));
    }
    #[cfg(target_os = "macos")]
    {
        logger::register_prefix("darwin", logger::COLOR_GRAY);
        Box::new(darwin::DarwinPlatform::new())
    }
    #[cfg(not(target_os = "macos"))]
    {
        logger::register_prefix("stub", logger::COLOR_GRAY);
        logger::warn("no native platform for this OS, using the stub");
        Box::new(stub::StubPlatform::flaky(0.1))
    }
}

pub type SharedWindow = Rc<RefCell<Box<dyn WindowHandle>>>;

/// The game window seen as both screen and input device.
///
/// Clones share the same handle, so one can be lent to the executor as the
/// screen and another as the input collaborator.
#[derive(Clone)]
pub struct GameWindow {
    win: SharedWindow,
    step_delay: Duration,
}

impl GameWindow {
    pub fn new(win: Box<dyn WindowHandle>) -> Self {
        Self { win: Rc::new(RefCell::new(win)), step_delay: Duration::from_millis(120) }
    }

    /// Pause between the primitive events of one request.
    pub fn with_step_delay(mut self, d: Duration) -> Self {
        self.step_delay = d;
        self
    }

    pub fn shared(&self) -> SharedWindow {
        Rc::clone(&self.win)
    }

    pub fn activate(&self) {
        let mut win = self.win.borrow_mut();
        win.refresh();
        win.activate();
    }

    pub fn title(&self) -> String {
        self.win.borrow().title().to_string()
    }
}

impl RegionCapture for GameWindow {
    fn capture(&mut self, region: Region) -> Result<Capture, CaptureError> {
        self.win.borrow_mut().capture(region)
    }
}

impl InputSimulator for GameWindow {
    fn invoke(&mut self, request: &InputRequest) -> Result<(), InputFault> {
        let steps = request.steps();
        for (i, step) in steps.iter().enumerate() {
            if i > 0 {
                thread::sleep(clock::jittered(self.step_delay, 0.1));
            }
            let mut win = self.win.borrow_mut();
            match step {
                InputStep::Tap(key) => win.tap(key)?,
                InputStep::Click(p) => win.click_at(*p)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Operation;
    use crate::vision::DifferenceEvaluator;

    #[test]
    fn game_window_drives_the_stub_end_to_end() {
        let platform = stub::StubPlatform::default();
        let (id, _) = platform.find_windows("BloonsTD6")[0].clone();
        let game = GameWindow::new(platform.open_window(id)).with_step_delay(Duration::ZERO);
        let mut screen = game.clone();
        let mut input = game.clone();

        let region = Region::from_size(100, 100, 20, 20);
        let before = screen.capture(region).unwrap();
        input
            .invoke(&InputRequest {
                operation: Operation::Buy,
                target: "Dart Monkey 01".into(),
                position: Some(Point::new(110, 110)),
                keys: vec!["q".into()],
            })
            .unwrap();
        let after = screen.capture(region).unwrap();
        let score = DifferenceEvaluator::default().score(&before, &after).unwrap();
        assert_eq!(score.fraction(), 1.0);
    }
}
