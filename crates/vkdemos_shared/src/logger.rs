use std::{io::Write, thread};

use env_logger::{Builder, Target};
use log::LevelFilter;

/// Sets up logging to stderr. `RUST_LOG` overrides the default `info` filter.
pub fn init_logger() {
    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();
    builder.target(Target::Stderr);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "[{:<5}] {}: {}",
            record.level(),
            thread::current().name().unwrap_or("<unnamed>"),
            record.args()
        )
    });
    // A second call from the same process keeps the first logger
    let _ = builder.try_init();
}
