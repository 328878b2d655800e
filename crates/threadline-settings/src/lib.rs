//! # threadline-settings
//!
//! Settings are loaded from layers, lowest priority first:
//! 1. **Compiled defaults**: [`Settings::default()`]
//! 2. **User file**: `~/.threadline/settings.json` or an explicit path,
//!    deep-merged over the defaults
//! 3. **Environment variables**: `THREADLINE_*` overrides
//!
//! Command-line flags are applied by the binary on top of the result.
//!
//! ```no_run
//! let settings = threadline_settings::load_settings().unwrap();
//! println!("listening on {}:{}", settings.server.host, settings.server.port);
//! ```

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{database_path, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
