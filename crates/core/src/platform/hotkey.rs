use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Latch set by the global killswitch hotkey.
///
/// The listener thread only ever sets it; whoever consumes a press clears it
/// with `take`, so one press aborts one run.
#[derive(Debug, Clone, Default)]
pub struct Killswitch {
    latch: Arc<AtomicBool>,
}

impl Killswitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the OS listener. Without OS support this is a no-op and only
    /// `press` raises the latch.
    pub fn listen(&self) {
        start_listener(Arc::clone(&self.latch));
    }

    pub fn press(&self) {
        self.latch.store(true, Ordering::Release);
    }

    /// Consume a pending press.
    pub fn take(&self) -> bool {
        self.latch.swap(false, Ordering::AcqRel)
    }

    pub fn latch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.latch)
    }
}

/// Cmd+Shift+K through a listen-only CGEventTap.
#[cfg(target_os = "macos")]
fn start_listener(latch: Arc<AtomicBool>) {
    use std::ffi::c_void;
    use std::sync::atomic::AtomicPtr;

    type CGEventTapProxy = *mut c_void;
    type CGEventRef = *mut c_void;
    type CFMachPortRef = *mut c_void;
    type CFRunLoopSourceRef = *mut c_void;
    type CFRunLoopRef = *mut c_void;
    type CFStringRef = *const c_void;
    type CGEventMask = u64;
    type CGEventType = u32;
    type CGEventFlags = u64;
    type CGEventTapCallBack =
        unsafe extern "C" fn(CGEventTapProxy, CGEventType, CGEventRef, *mut c_void) -> CGEventRef;

    const K_CG_HID_EVENT_TAP: u32 = 0;
    const K_CG_HEAD_INSERT_EVENT_TAP: u32 = 0;
    const K_CG_EVENT_TAP_OPTION_LISTEN_ONLY: u32 = 1;
    const K_CG_KEYBOARD_EVENT_KEYCODE: u32 = 9;
    const CG_EVENT_KEY_DOWN: u32 = 10;
    const CG_EVENT_TAP_DISABLED_BY_TIMEOUT: u32 = 0xFFFF_FFFE;

    const FLAG_SHIFT: u64 = 0x0002_0000;
    const FLAG_CONTROL: u64 = 0x0004_0000;
    const FLAG_ALTERNATE: u64 = 0x0008_0000;
    const FLAG_COMMAND: u64 = 0x0010_0000;

    const KEYCODE_K: i64 = 40;

    extern "C" {
        fn CGEventTapCreate(
            tap: u32,
            place: u32,
            options: u32,
            events_of_interest: CGEventMask,
            callback: CGEventTapCallBack,
            user_info: *mut c_void,
        ) -> CFMachPortRef;
        fn CFMachPortCreateRunLoopSource(allocator: *const c_void, port: CFMachPortRef, order: i64) -> CFRunLoopSourceRef;
        fn CFRunLoopGetCurrent() -> CFRunLoopRef;
        fn CFRunLoopAddSource(rl: CFRunLoopRef, source: CFRunLoopSourceRef, mode: CFStringRef);
        fn CFRunLoopRun();
        fn CGEventGetFlags(event: CGEventRef) -> CGEventFlags;
        fn CGEventGetIntegerValueField(event: CGEventRef, field: u32) -> i64;
        fn CGEventTapEnable(tap: CFMachPortRef, enable: bool);
        static kCFRunLoopCommonModes: CFStringRef;
    }

    // the system disables slow taps; the callback turns ours back on
    static TAP: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());

    unsafe extern "C" fn on_event(
        _proxy: CGEventTapProxy,
        event_type: CGEventType,
        event: CGEventRef,
        user_info: *mut c_void,
    ) -> CGEventRef {
        unsafe {
            if event_type == CG_EVENT_TAP_DISABLED_BY_TIMEOUT {
                let tap = TAP.load(Ordering::Acquire);
                if !tap.is_null() {
                    CGEventTapEnable(tap, true);
                }
                return event;
            }
            if event_type != CG_EVENT_KEY_DOWN {
                return event;
            }

            let flags = CGEventGetFlags(event);
            let keycode = CGEventGetIntegerValueField(event, K_CG_KEYBOARD_EVENT_KEYCODE);
            let chord = flags & FLAG_COMMAND != 0
                && flags & FLAG_SHIFT != 0
                && flags & FLAG_ALTERNATE == 0
                && flags & FLAG_CONTROL == 0;
            if keycode == KEYCODE_K && chord {
                let latch = &*(user_info as *const AtomicBool);
                latch.store(true, Ordering::Release);
            }
            event
        }
    }

    std::thread::spawn(move || unsafe {
        let latch_ptr = Arc::into_raw(latch) as *mut c_void;
        let tap = CGEventTapCreate(
            K_CG_HID_EVENT_TAP,
            K_CG_HEAD_INSERT_EVENT_TAP,
            K_CG_EVENT_TAP_OPTION_LISTEN_ONLY,
            1 << CG_EVENT_KEY_DOWN,
            on_event,
            latch_ptr,
        );
        if tap.is_null() {
            crate::logger::error("killswitch unavailable: grant Accessibility permission to your terminal");
            drop(Arc::from_raw(latch_ptr as *const AtomicBool));
            return;
        }
        TAP.store(tap, Ordering::Release);

        let source = CFMachPortCreateRunLoopSource(std::ptr::null(), tap, 0);
        CFRunLoopAddSource(CFRunLoopGetCurrent(), source, kCFRunLoopCommonModes);
        CGEventTapEnable(tap, true);
        crate::logger::info("killswitch armed: Cmd+Shift+K");
        CFRunLoopRun();
    });
}

/// Ctrl+Shift+K through RegisterHotKey on a dedicated message loop.
#[cfg(target_os = "windows")]
fn start_listener(latch: Arc<AtomicBool>) {
    use std::ffi::c_void;

    type HWND = *mut c_void;

    #[repr(C)]
    struct POINT {
        x: i32,
        y: i32,
    }

    #[repr(C)]
    struct MSG {
        hwnd: HWND,
        message: u32,
        w_param: usize,
        l_param: isize,
        time: u32,
        pt: POINT,
    }

    const MOD_CONTROL: u32 = 0x0002;
    const MOD_SHIFT: u32 = 0x0004;
    const MOD_NOREPEAT: u32 = 0x4000;
    const VK_K: u32 = 0x4B;
    const WM_HOTKEY: u32 = 0x0312;
    const HOTKEY_ID: i32 = 1;

    #[link(name = "user32")]
    extern "system" {
        fn RegisterHotKey(hwnd: HWND, id: i32, modifiers: u32, vk: u32) -> i32;
        fn GetMessageW(msg: *mut MSG, hwnd: HWND, min: u32, max: u32) -> i32;
    }

    std::thread::spawn(move || unsafe {
        if RegisterHotKey(std::ptr::null_mut(), HOTKEY_ID, MOD_CONTROL | MOD_SHIFT | MOD_NOREPEAT, VK_K) == 0 {
            crate::logger::error("killswitch unavailable: Ctrl+Shift+K is taken by another application");
            return;
        }
        crate::logger::info("killswitch armed: Ctrl+Shift+K");

        let mut msg: MSG = std::mem::zeroed();
        while GetMessageW(&mut msg, std::ptr::null_mut(), 0, 0) > 0 {
            if msg.message == WM_HOTKEY && msg.w_param == HOTKEY_ID as usize {
                latch.store(true, Ordering::Release);
            }
        }
    });
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn start_listener(_latch: Arc<AtomicBool>) {
    crate::logger::warn("no global killswitch on this OS; use the abort key");
}

/// Bring the terminal that launched us back to the front.
#[cfg(target_os = "macos")]
pub fn activate_terminal() {
    let ppid = unsafe { libc::getppid() };
    let script = format!(
        "tell application \"System Events\" to set frontmost of first process whose unix id is {} to true",
        ppid
    );
    std::process::Command::new("osascript")
        .arg("-e")
        .arg(&script)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .ok();
}

#[cfg(target_os = "windows")]
pub fn activate_terminal() {
    use std::ffi::c_void;

    const SW_RESTORE: i32 = 9;

    #[link(name = "kernel32")]
    extern "system" {
        fn GetConsoleWindow() -> *mut c_void;
    }
    #[link(name = "user32")]
    extern "system" {
        fn SetForegroundWindow(hwnd: *mut c_void) -> i32;
        fn ShowWindow(hwnd: *mut c_void, cmd_show: i32) -> i32;
    }

    unsafe {
        let hwnd = GetConsoleWindow();
        if !hwnd.is_null() {
            ShowWindow(hwnd, SW_RESTORE);
            SetForegroundWindow(hwnd);
        }
    }
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub fn activate_terminal() {}
