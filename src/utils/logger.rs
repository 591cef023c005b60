use chrono::Utc;
use log::info;
use std::io::Write;

/// Logger setup shared by the chatty binaries.
pub struct ChattyLogger;

impl ChattyLogger {
    /// Initialise env_logger. `RUST_LOG` wins over `level` when both are set.
    pub fn init(level: &str) -> Result<(), log::SetLoggerError> {
        env_logger::Builder::new()
            .parse_filters(level)
            .parse_env("RUST_LOG")
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{}] [{}] [{}:{}] {}",
                    Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
                    record.level(),
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0),
                    record.args()
                )
            })
            .try_init()?;

        info!("chatty logger initialized (level={})", level);
        Ok(())
    }
}
