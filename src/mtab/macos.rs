use super::{MountInfo, MountTable};
use crate::process;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Mount table read from the output of `/sbin/mount`.
///
/// macOS has no bind mounts, so the mutating primitives all report failure.
pub struct MacOsMountTable;

impl MacOsMountTable {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MacOsMountTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MountTable for MacOsMountTable {
    fn read(&self) -> io::Result<Vec<MountInfo>> {
        // Full path: sudo may have dropped /sbin from PATH
        let output = process::capture_stdout(&mut Command::new("/sbin/mount"))
            .map_err(|e| io::Error::other(e.to_string()))?;
        Ok(parse_macos_mount_output(&output))
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

/// Parse lines of the form `<device> on <mount point> (<fstype>, <opts>...)`.
pub fn parse_macos_mount_output(contents: &str) -> Vec<MountInfo> {
    contents.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<MountInfo> {
    let (device, rest) = line.split_once(" on ")?;
    let open = rest.rfind(" (")?;
    let opts = rest[open + 2..].strip_suffix(')')?;
    let fs_type = opts.split_once(',').map_or(opts, |(fs_type, _)| fs_type);
    if device.is_empty() || device.contains(char::is_whitespace) {
        return None;
    }
    Some(MountInfo {
        device: device.to_string(),
        mount_point: PathBuf::from(&rest[..open]),
        fs_type: fs_type.to_string(),
    })
}
