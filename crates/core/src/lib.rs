pub mod cancel;
pub mod clock;
pub mod confirm;
pub mod diagnostics;
pub mod executor;
pub mod fakes;
pub mod input;
pub mod logger;
pub mod lua_rt;
pub mod oracle;
pub mod platform;
pub mod retry;
pub mod session;
pub mod settings;
pub mod strategy;
pub mod types;
pub mod vision;
