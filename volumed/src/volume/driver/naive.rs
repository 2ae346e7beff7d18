use std::fs;
use std::path::Path;
use tracing::debug;

use super::{copy_tree, create_dir, remove_tree, Driver, DriverError};

/// Driver that duplicates volumes with a plain recursive copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaiveDriver;

impl Driver for NaiveDriver {
    fn name(&self) -> &'static str {
        "naive"
    }

    fn create_empty(&self, path: &Path) -> Result<(), DriverError> {
        create_dir(path)
    }

    fn duplicate(&self, from: &Path, to: &Path) -> Result<(), DriverError> {
        copy_tree(from, to, |src, dst| fs::copy(src, dst).map(|_| ()))?;
        debug!("Copied {:?} -> {:?}", from, to);
        Ok(())
    }

    fn destroy(&self, path: &Path) -> Result<(), DriverError> {
        remove_tree(path)
    }
}
