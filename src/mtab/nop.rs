use super::{MountInfo, MountTable};
use std::io;
use std::path::Path;

/// Fallback for platforms without an inspectable mount table.
pub struct NopMountTable;

impl MountTable for NopMountTable {
    fn read(&self) -> io::Result<Vec<MountInfo>> {
        Ok(Vec::new())
    }

    fn unmount_lazy(&self, _mount_point: &Path) -> bool {
        false
    }

    fn unmount_force(&self, _mount_point: &Path) -> bool {
        false
    }

    fn create_bind_mount(&self, _source: &Path, _dest: &Path) -> bool {
        false
    }
}
