use std::fs;
use std::path::Path;
use tracing::{debug, info};

use super::{copy_tree, create_dir, remove_tree, Driver, DriverError};

/// Driver that shares file extents with the parent through reflinks.
///
/// Files the filesystem refuses to reflink are copied instead, so the driver
/// stays correct on filesystems without copy-on-write support.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReflinkDriver;

impl Driver for ReflinkDriver {
    fn name(&self) -> &'static str {
        "reflink"
    }

    fn create_empty(&self, path: &Path) -> Result<(), DriverError> {
        create_dir(path)
    }

    fn duplicate(&self, from: &Path, to: &Path) -> Result<(), DriverError> {
        copy_tree(from, to, |src, dst| match reflink::reflink(src, dst) {
            Ok(()) => {
                debug!("Reflinked: {:?} -> {:?}", src, dst);
                Ok(())
            }
            Err(e) => {
                debug!(
                    "Reflink failed ({}), falling back to copy: {:?} -> {:?}",
                    e, src, dst
                );
                fs::copy(src, dst).map(|_| ())
            }
        })?;

        info!("Volume snapshot complete: {:?} -> {:?}", from, to);
        Ok(())
    }

    fn destroy(&self, path: &Path) -> Result<(), DriverError> {
        remove_tree(path)
    }
}
