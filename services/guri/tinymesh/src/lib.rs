//! TinyMesh configuration mode for guri.
//!
//! Before bridging, guri can put the attached radio module into its
//! configuration mode, make sure it runs as a gateway with the operator's
//! network, system and unique IDs, and leave again. Independently, it can
//! verify those IDs without touching the module's memory.
//!
//! ## States
//!
//! ```text
//! Unknown -> Probing -> InConfig ----------------> Provisioning -> ExitedConfig
//!                    \-> NotInConfig -> (enter) -/               \-> Failed
//!
//! Unknown -> Probing -> NotInConfig -> (get NID) -> Verified | Failed
//! ```
//!
//! Everything here runs against a [`guri_transport::Transport`], in
//! practice the serial binding.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config_mode;
pub mod error;
pub mod identity;
pub mod memory;
pub mod verify;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export main types
pub use config_mode::{ConfigMode, ConfigState, ConfigTiming, ProvisionReport};
pub use error::{ConfigError, IdentityField};
pub use identity::Identity;
pub use memory::{CalibrationPage, ConfigValue, ConfigurationPage, MemoryPage};
