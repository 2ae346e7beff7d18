//! Volume storage configuration.

use serde::Deserialize;
use std::path::PathBuf;

use crate::volume::DriverKind;

/// Where and how volumes are stored.
#[derive(Debug, Deserialize, Clone)]
pub struct VolumeSettings {
    /// Directory holding the `init`, `live` and `dead` areas.
    pub root: PathBuf,
    /// Filesystem driver used to create and duplicate volumes.
    #[serde(default)]
    pub driver: DriverKind,
}
