use std::io::Write;

use env_logger::Builder;

/// Install the process-wide logger.
///
/// The level comes from `RUST_LOG`. Calling this more than once (every
/// test does) is harmless.
pub fn init_log() {
    let mut builder = Builder::from_default_env();
    let _ = builder
        .format_timestamp_secs()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] [{}:{}] {}",
                record.level(),
                record.file().unwrap_or("?"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .try_init();
}
