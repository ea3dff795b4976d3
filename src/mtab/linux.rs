use super::{MountInfo, MountTable, privileged};
use crate::process;
use std::io;
use std::path::{Path, PathBuf};

const PROC_MOUNTS: &str = "/proc/self/mounts";

/// Mount table backed by `/proc/self/mounts`.
///
/// `/etc/mtab` is not guaranteed to be a symlink to the proc view on older
/// distributions, so the proc file is read directly.
pub struct LinuxMountTable {
    mounts_path: PathBuf,
}

impl LinuxMountTable {
    pub fn new() -> Self {
        Self { mounts_path: PathBuf::from(PROC_MOUNTS) }
    }

    /// Read mounts from an alternative file with the same format.
    pub fn with_mounts_file(path: impl Into<PathBuf>) -> Self {
        Self { mounts_path: path.into() }
    }
}

impl Default for LinuxMountTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MountTable for LinuxMountTable {
    fn read(&self) -> io::Result<Vec<MountInfo>> {
        let contents = std::fs::read(&self.mounts_path)?;
        Ok(parse_mtab(&String::from_utf8_lossy(&contents)))
    }

    fn unmount_lazy(&self, mount_point: &Path) -> bool {
        // MNT_DETACH
        process::succeeds(privileged("umount").arg("-l").arg(mount_point))
    }

    fn unmount_force(&self, mount_point: &Path) -> bool {
        // MNT_FORCE
        process::succeeds(privileged("umount").arg("-f").arg(mount_point))
    }

    fn create_bind_mount(&self, source: &Path, dest: &Path) -> bool {
        process::succeeds(privileged("mount").args(["-o", "bind"]).arg(source).arg(dest))
    }
}

/// Parse the `fstab(5)`-formatted contents of a mounts file.
pub fn parse_mtab(contents: &str) -> Vec<MountInfo> {
    let mut mounts = Vec::new();
    for line in contents.lines() {
        let entries: Vec<&str> = line.split_whitespace().collect();
        if entries.len() != 6 {
            tracing::warn!("mount table line has {} entries instead of 6", entries.len());
            continue;
        }
        mounts.push(MountInfo {
            device: unescape(entries[0]),
            mount_point: PathBuf::from(unescape(entries[1])),
            fs_type: unescape(entries[2]),
        });
    }
    mounts
}

/// Decode the octal escapes (`\040` for space etc) the kernel uses for
/// whitespace and backslashes in mount table fields.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal_escape(&bytes[i + 1..i + 4]) {
            let digits = &bytes[i + 1..i + 4];
            out.push((digits[0] - b'0') * 64 + (digits[1] - b'0') * 8 + (digits[2] - b'0'));
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn is_octal_escape(digits: &[u8]) -> bool {
    digits.len() == 3 && digits[0] <= b'3' && digits.iter().all(|d| (b'0'..=b'7').contains(d))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mtab() {
        let contents = "\
homedir.com:/home/user /home/user nfs rw 0 0
/dev/sda1 / ext4 rw,relatime 0 0
edenfs: /data/repo fuse rw,nosuid 0 0
not enough fields
";
        let mounts = parse_mtab(contents);
        assert_eq!(mounts.len(), 3);
        assert_eq!(
            mounts[0],
            MountInfo {
                device: "homedir.com:/home/user".to_string(),
                mount_point: PathBuf::from("/home/user"),
                fs_type: "nfs".to_string(),
            }
        );
        assert_eq!(mounts[2].mount_point, PathBuf::from("/data/repo"));
        assert_eq!(mounts[2].fs_type, "fuse");
    }

    #[test]
    fn test_parse_mtab_decodes_octal_escapes() {
        let mounts = parse_mtab("/dev/sdb1 /mnt/my\\040disk ext4 rw 0 0\n");
        assert_eq!(mounts[0].mount_point, PathBuf::from("/mnt/my disk"));
    }

    #[test]
    fn test_unescape_leaves_plain_backslashes() {
        assert_eq!(unescape("a\\b"), "a\\b");
        assert_eq!(unescape("trailing\\04"), "trailing\\04");
        assert_eq!(unescape("tab\\011x"), "tab\tx");
    }

    #[test]
    fn test_read_from_alternate_file() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("mounts");
        std::fs::write(&file, "tmpfs /repo/out tmpfs rw 0 0\n").unwrap();

        let table = LinuxMountTable::with_mounts_file(&file);
        let mounts = table.read().unwrap();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].mount_point, PathBuf::from("/repo/out"));
    }
}
