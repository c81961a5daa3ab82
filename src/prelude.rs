pub use crate::error::{ImportError, Result};
