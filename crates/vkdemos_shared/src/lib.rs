mod args;
mod config;
mod handoff;
mod logger;

pub use args::DemoArgs;
pub use config::{
    DemoConfig, ENV_FRAMES, ENV_OUTPUT, ENV_SHADER_DIR, ENV_THREAD_OUTPUT, ENV_VALIDATION,
};
pub use handoff::{Handoff, PublishGuard};
pub use logger::init_logger;
