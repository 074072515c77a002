use std::process::{Command as ProcessCommand, Stdio};
use std::thread;
use std::time::Duration;

use core_foundation::array::CFArray;
use core_foundation::base::TCFType;
use core_foundation::dictionary::CFDictionary;
use core_foundation::number::CFNumber;
use core_foundation::string::CFString;
use core_graphics::event::*;
use core_graphics::event_source::*;
use core_graphics::geometry::*;
use core_graphics::window::*;

use super::{Platform, WindowHandle};
use crate::input::InputFault;
use crate::logger;
use crate::types::*;
use crate::vision::CaptureError;

type CFDict = CFDictionary<CFString, *const std::ffi::c_void>;

// AppleScript key codes for keys that have no keystroke character
fn applescript_key_code(key: &str) -> Option<u16> {
    match key {
        "enter" | "return" => Some(36),
        "escape" | "esc" => Some(53),
        "delete" | "backspace" => Some(51),
        "tab" => Some(48),
        "space" => Some(49),
        "up" => Some(126),
        "down" => Some(125),
        "left" => Some(123),
        "right" => Some(124),
        _ => None,
    }
}

/// Every on-screen window dictionary, front to back.
fn on_screen_windows() -> Vec<CFDict> {
    unsafe {
        let option = kCGWindowListOptionOnScreenOnly | kCGWindowListExcludeDesktopElements;
        let list_ref = CGWindowListCopyWindowInfo(option, kCGNullWindowID);
        if list_ref.is_null() {
            logger::warn_p("darwin", "failed to get window list");
            return Vec::new();
        }
        let list: CFArray = CFArray::wrap_under_create_rule(list_ref as _);
        list.get_all_values()
            .iter()
            .map(|ptr| CFDictionary::wrap_under_get_rule(*ptr as _))
            .collect()
    }
}

pub struct DarwinPlatform;

impl DarwinPlatform {
    pub fn new() -> Self {
        DarwinPlatform
    }
}

impl Platform for DarwinPlatform {
    fn find_windows(&self, pattern: &str) -> Vec<(WindowId, String)> {
        let re = match regex::Regex::new(&format!("(?i){}", pattern)) {
            Ok(r) => r,
            Err(e) => {
                logger::error(&format!("invalid window pattern '{}': {}", pattern, e));
                return Vec::new();
            }
        };

        let mut windows = Vec::new();
        for dict in on_screen_windows() {
            let (name, owner, wid, layer) = unsafe {
                (
                    get_cf_string(&dict, "kCGWindowName").unwrap_or_default(),
                    get_cf_string(&dict, "kCGWindowOwnerName").unwrap_or_default(),
                    get_cf_number(&dict, "kCGWindowNumber"),
                    get_cf_number(&dict, "kCGWindowLayer"),
                )
            };
            let title = if !name.is_empty() { &name } else { &owner };
            let matched = re.is_match(&name) || re.is_match(&owner);
            if let (true, Some(0), Some(wid)) = (matched && !title.is_empty(), layer, wid) {
                logger::info_p("darwin", &format!("found window \"{}\" (id {})", title, wid));
                windows.push((wid as WindowId, title.to_string()));
            }
        }
        windows
    }

    fn open_window(&self, window_id: WindowId) -> Box<dyn WindowHandle> {
        let mut win = DarwinWindow {
            window_id: window_id as CGWindowID,
            title: String::new(),
            pid: None,
            bounds: None,
        };
        win.refresh();
        Box::new(win)
    }
}

struct DarwinWindow {
    window_id: CGWindowID,
    title: String,
    pid: Option<i32>,
    bounds: Option<WindowBounds>,
}

impl DarwinWindow {
    fn require_pid(&mut self) -> Result<i32, InputFault> {
        if self.pid.is_none() {
            self.refresh();
        }
        self.pid.ok_or(InputFault::WindowLost)
    }
}

fn run_osascript(script: &str) -> bool {
    ProcessCommand::new("osascript")
        .arg("-e")
        .arg(script)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

impl WindowHandle for DarwinWindow {
    fn id(&self) -> WindowId {
        self.window_id as WindowId
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn bounds(&self) -> Option<WindowBounds> {
        self.bounds
    }

    fn refresh(&mut self) {
        for dict in on_screen_windows() {
            unsafe {
                if get_cf_number(&dict, "kCGWindowNumber") != Some(self.window_id as i64) {
                    continue;
                }
                let name = get_cf_string(&dict, "kCGWindowName").unwrap_or_default();
                let owner = get_cf_string(&dict, "kCGWindowOwnerName").unwrap_or_default();
                self.title = if !name.is_empty() { name } else { owner };
                self.pid = get_cf_number(&dict, "kCGWindowOwnerPID").map(|v| v as i32);
                self.bounds = get_cf_dict(&dict, "kCGWindowBounds").map(|b| WindowBounds {
                    x: get_cf_number(&b, "X").unwrap_or(0) as i32,
                    y: get_cf_number(&b, "Y").unwrap_or(0) as i32,
                    w: get_cf_number(&b, "Width").unwrap_or(0) as i32,
                    h: get_cf_number(&b, "Height").unwrap_or(0) as i32,
                });
            }
            return;
        }
        self.bounds = None;
    }

    fn activate(&mut self) {
        let Ok(pid) = self.require_pid() else { return };
        let script = format!(
            "tell application \"System Events\" to set frontmost of first process whose unix id is {} to true",
            pid
        );
        if !run_osascript(&script) {
            logger::warn_p("darwin", &format!("could not bring pid {} to front", pid));
        }
    }

    fn click_at(&mut self, p: Point) -> Result<(), InputFault> {
        self.refresh();
        let bounds = self.bounds.ok_or(InputFault::WindowLost)?;
        let pid = self.require_pid()?;

        let point = CGPoint::new((bounds.x + p.x) as f64, (bounds.y + p.y) as f64);
        let source = CGEventSource::new(CGEventSourceStateID::HIDSystemState)
            .map_err(|_| InputFault::Click(p, "no event source".into()))?;

        for kind in [CGEventType::LeftMouseDown, CGEventType::LeftMouseUp] {
            let event = CGEvent::new_mouse_event(source.clone(), kind, point, CGMouseButton::Left)
                .map_err(|_| InputFault::Click(p, "could not build mouse event".into()))?;
            event.post_to_pid(pid);
            thread::sleep(Duration::from_millis(15));
        }
        Ok(())
    }

    fn tap(&mut self, key: &str) -> Result<(), InputFault> {
        let pid = self.require_pid()?;

        let parts: Vec<&str> = key.split('+').collect();
        let main_key = parts.last().copied().unwrap_or(key);
        let mut modifiers = Vec::new();
        for part in &parts[..parts.len().saturating_sub(1)] {
            match part.to_lowercase().as_str() {
                "cmd" | "command" => modifiers.push("command down"),
                "shift" => modifiers.push("shift down"),
                "ctrl" | "control" => modifiers.push("control down"),
                "alt" | "option" => modifiers.push("option down"),
                _ => {}
            }
        }

        let mut chars = main_key.chars();
        let lower = match (chars.next(), chars.next()) {
            (Some(ch), None) => {
                if ch.is_ascii_uppercase() && !modifiers.contains(&"shift down") {
                    modifiers.push("shift down");
                }
                ch.to_lowercase().to_string()
            }
            _ => main_key.to_lowercase(),
        };

        let key_part = if let Some(code) = applescript_key_code(&lower) {
            format!("key code {}", code)
        } else if lower.chars().count() == 1 {
            format!("keystroke \"{}\"", lower.replace('"', "\\\""))
        } else {
            return Err(InputFault::Key(key.to_string(), "unknown key".into()));
        };
        let modifier_str = if modifiers.is_empty() {
            String::new()
        } else {
            format!(" using {{{}}}", modifiers.join(", "))
        };

        let script = format!(
            "tell application \"System Events\" to tell process id {} to {}{}",
            pid, key_part, modifier_str
        );
        if !run_osascript(&script) {
            return Err(InputFault::Key(key.to_string(), "osascript failed".into()));
        }
        thread::sleep(Duration::from_millis(50));
        Ok(())
    }

    fn capture(&mut self, rect: Region) -> Result<Capture, CaptureError> {
        self.refresh();
        let bounds = self.bounds.ok_or(CaptureError::WindowLost)?;

        let cg_rect = CGRect::new(
            &CGPoint::new((bounds.x + rect.l) as f64, (bounds.y + rect.t) as f64),
            &CGSize::new(rect.width() as f64, rect.height() as f64),
        );
        let image_option = kCGWindowImageBoundsIgnoreFraming | kCGWindowImageNominalResolution;
        let image = create_image(cg_rect, kCGWindowListOptionIncludingWindow, self.window_id, image_option)
            .ok_or_else(|| CaptureError::Unavailable {
                region: rect,
                reason: "window not capturable (hidden or no screen-recording permission)".into(),
            })?;

        let data = image.data();
        let mut cap = Capture::from_bgra(rect, image.width() as u32, image.height() as u32, data.bytes().to_vec());
        cap.bytes_per_row = image.bytes_per_row() as u32;
        Ok(cap)
    }
}

// --- CF dictionary helpers ---

unsafe fn get_cf_string(dict: &CFDict, key: &str) -> Option<String> {
    let value = dict.find(&CFString::new(key))?;
    let s: CFString = CFString::wrap_under_get_rule(*value as _);
    Some(s.to_string())
}

unsafe fn get_cf_number(dict: &CFDict, key: &str) -> Option<i64> {
    let value = dict.find(&CFString::new(key))?;
    let n: CFNumber = CFNumber::wrap_under_get_rule(*value as _);
    n.to_i64()
}

unsafe fn get_cf_dict(dict: &CFDict, key: &str) -> Option<CFDict> {
    let value = dict.find(&CFString::new(key))?;
    Some(CFDictionary::wrap_under_get_rule(*value as _))
}
