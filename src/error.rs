use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ImportError>;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("broker: {0}")]
    Broker(#[from] amiquip::Error),

    #[error("database: {0}")]
    Db(#[from] mysql::Error),

    #[error("malformed task body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("csv {}: {}", .path.display(), .source)]
    Csv { path: PathBuf, source: csv::Error },

    #[error("no file found for task {file_name}")]
    FileNotFound { file_name: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config: {0}")]
    Config(String),
}

/// MySQL server codes treated as transient: deadlock, lock wait timeout,
/// lost connection, server gone away.
const TRANSIENT_MYSQL_CODES: [u16; 4] = [1213, 1205, 2013, 2006];

impl ImportError {
    /// Whether the failed task may succeed on a later delivery. Decode,
    /// missing-file and parse failures never will; connection-level and
    /// lock-level database failures usually do.
    pub fn is_retryable(&self) -> bool {
        match self {
            ImportError::Db(err) => {
                if let mysql::Error::MySqlError(server) = err {
                    if TRANSIENT_MYSQL_CODES.contains(&server.code) {
                        return true;
                    }
                }
                if matches!(err, mysql::Error::IoError(_)) {
                    return true;
                }
                transient_text(&err.to_string())
            }
            ImportError::Io(err) => {
                let text = err.to_string().to_lowercase();
                text.contains("locked") || text.contains("busy")
            }
            _ => false,
        }
    }

    /// Lock-cycle abortion, the one failure the loader retries internally.
    pub fn is_deadlock(&self) -> bool {
        match self {
            ImportError::Db(err) => is_mysql_deadlock(err),
            _ => false,
        }
    }
}

pub fn is_mysql_deadlock(err: &mysql::Error) -> bool {
    if let mysql::Error::MySqlError(server) = err {
        if server.code == 1213 {
            return true;
        }
    }
    let text = err.to_string();
    text.contains("Deadlock") || text.contains("deadlock") || text.contains("Error 1213")
}

// Classification by message text is fragile but deliberate: the driver does
// not expose typed codes for every transport-level failure.
fn transient_text(message: &str) -> bool {
    let text = message.to_lowercase();
    text.contains("deadlock")
        || text.contains("error 1213")
        || text.contains("lock wait timeout")
        || text.contains("error 1205")
        || text.contains("gone away")
        || text.contains("connection reset")
        || text.contains("connection refused")
        || text.contains("timeout")
        || text.contains("temporary failure")
}

#[cfg(test)]
mod tests {
    use super::*;
    use mysql::error::MySqlError;

    fn server_error(code: u16, message: &str) -> ImportError {
        ImportError::Db(mysql::Error::MySqlError(MySqlError {
            state: "HY000".into(),
            message: message.into(),
            code,
        }))
    }

    #[test]
    fn deadlock_code_is_deadlock_and_retryable() {
        let err = server_error(1213, "Deadlock found when trying to get lock");
        assert!(err.is_deadlock());
        assert!(err.is_retryable());
    }

    #[test]
    fn deadlock_text_without_code_is_deadlock() {
        let err = server_error(9999, "deadlock detected somewhere");
        assert!(err.is_deadlock());
    }

    #[test]
    fn lock_wait_timeout_is_retryable_but_not_deadlock() {
        let err = server_error(1205, "Lock wait timeout exceeded");
        assert!(err.is_retryable());
        assert!(!err.is_deadlock());
    }

    #[test]
    fn duplicate_key_is_terminal() {
        let err = server_error(1062, "Duplicate entry 'x' for key 'name'");
        assert!(!err.is_retryable());
        assert!(!err.is_deadlock());
    }

    #[test]
    fn gone_away_text_is_retryable() {
        let err = server_error(9999, "MySQL server has gone away");
        assert!(err.is_retryable());
    }

    #[test]
    fn decode_and_missing_file_are_terminal() {
        let decode = serde_json::from_slice::<serde_json::Value>(b"not json").unwrap_err();
        assert!(!ImportError::Decode(decode).is_retryable());
        let missing = ImportError::FileNotFound {
            file_name: "x.csv".into(),
        };
        assert!(!missing.is_retryable());
    }

    #[test]
    fn busy_file_is_retryable() {
        let err = ImportError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "resource temporarily locked",
        ));
        assert!(err.is_retryable());
    }
}
