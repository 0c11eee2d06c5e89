use chrono::Local;
use env_logger::{Builder, Env};
use std::{io::Write, sync::Once};

static INIT: Once = Once::new();

/// Installs the process-wide logger. `RUST_LOG` overrides the `info` default.
pub fn init_logging() {
    INIT.call_once(|| {
        Builder::from_env(Env::default().default_filter_or("info"))
            .format(|buf, record| {
                writeln!(
                    buf,
                    "{} [{}] - {}: {}",
                    Local::now().format("%Y-%m-%d %H:%M:%S"),
                    record.level(),
                    record.target(),
                    record.args()
                )
            })
            .init();
    });
}
