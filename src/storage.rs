//! 存储设备信息：挂载点、容量、USB 识别

use serde::Serialize;
use std::fmt;
use std::path::Path;
use sysinfo::Disks;

/// 常见的可移动介质挂载目录
pub const REMOVABLE_PREFIXES: [&str; 3] = ["/media/", "/mnt/", "/run/media/"];

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DriveKind {
    Usb,
    Internal,
}

impl fmt::Display for DriveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriveKind::Usb => f.write_str("USB"),
            DriveKind::Internal => f.write_str("内置"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageRecord {
    pub device: String,
    pub mount_point: String,
    pub filesystem: String,
    pub total_gb: f64,
    pub used_gb: f64,
    pub free_gb: f64,
    pub used_percent: f64,
    pub kind: DriveKind,
}

impl StorageRecord {
    fn from_bytes(
        device: String,
        mount_point: String,
        filesystem: String,
        total: u64,
        available: u64,
        kind: DriveKind,
    ) -> Self {
        let used = total.saturating_sub(available);
        let used_percent = if total > 0 {
            used as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        Self {
            device,
            mount_point,
            filesystem,
            total_gb: round_to(total as f64 / GIB, 2),
            used_gb: round_to(used as f64 / GIB, 2),
            free_gb: round_to(available as f64 / GIB, 2),
            used_percent: round_to(used_percent, 1),
            kind,
        }
    }
}

/// 列出所有已挂载的文件系统，无法读取的条目直接跳过
pub fn list_storage() -> Vec<StorageRecord> {
    let disks = Disks::new_with_refreshed_list();
    let mut records = Vec::new();

    for disk in &disks {
        let total = disk.total_space();
        if total == 0 {
            // 权限不足或伪文件系统
            continue;
        }
        let device = disk.name().to_string_lossy().to_string();
        let mount_point = disk.mount_point().to_string_lossy().to_string();
        let filesystem = disk.file_system().to_string_lossy().to_string();
        let kind = classify_drive(&mount_point, &device, Path::new("/sys/block"));

        records.push(StorageRecord::from_bytes(
            device,
            mount_point,
            filesystem,
            total,
            disk.available_space(),
            kind,
        ));
    }

    log::debug!("存储设备: {} 个", records.len());
    records
}

/// 判断设备是否为 USB
///
/// 挂载点前缀优先；否则在 Linux 上解析 `/sys/block/<dev>` 的符号链接，
/// 路径里出现 usb 即视为 USB 设备。
pub fn classify_drive(mount_point: &str, device: &str, sys_block: &Path) -> DriveKind {
    if REMOVABLE_PREFIXES
        .iter()
        .any(|prefix| mount_point.starts_with(prefix))
    {
        return DriveKind::Usb;
    }

    if cfg!(target_os = "linux") {
        if let Some(name) = block_device_name(device) {
            let sys_path = sys_block.join(name);
            if let Ok(real) = std::fs::canonicalize(&sys_path) {
                if real.to_string_lossy().to_lowercase().contains("usb") {
                    return DriveKind::Usb;
                }
            }
        }
    }

    DriveKind::Internal
}

/// `/dev/sdb1` → `sdb`，`/dev/nvme0n1p2` → `nvme0n1`，`/dev/nvme0n1` 原样返回
fn block_device_name(device: &str) -> Option<&str> {
    let base = device.rsplit('/').next()?;
    if base.is_empty() {
        return None;
    }

    // nvme0n1p2 / mmcblk0p1：盘名以数字结尾，分区号前有 p
    if let Some((disk, part)) = base.rsplit_once('p') {
        let is_partition = !part.is_empty() && part.chars().all(|c| c.is_ascii_digit());
        if is_partition && disk.ends_with(|c: char| c.is_ascii_digit()) {
            return Some(disk);
        }
    }

    // sdb1 / vda2 / xvda1：盘名是字母，直接去掉分区号
    if ["sd", "hd", "vd", "xvd"].iter().any(|p| base.starts_with(p)) {
        let disk = base.trim_end_matches(|c: char| c.is_ascii_digit());
        return (!disk.is_empty()).then_some(disk);
    }

    // 其余（nvme0n1、mmcblk0、loop0 ...）本身就是整盘
    Some(base)
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    #[test]
    fn removable_prefix_wins_over_sysfs() {
        let sys = tempfile::tempdir().unwrap();
        // sysfs 明确指向非 USB 设备
        let target = sys.path().join("devices/pci0000:00/ata1/block/sdb");
        std::fs::create_dir_all(&target).unwrap();
        symlink(&target, sys.path().join("sdb")).unwrap();

        for mount in ["/media/alice/STICK", "/mnt/backup", "/run/media/bob/DATA"] {
            assert_eq!(classify_drive(mount, "/dev/sdb1", sys.path()), DriveKind::Usb);
        }
    }

    #[test]
    fn sysfs_usb_path_is_detected() {
        let sys = tempfile::tempdir().unwrap();
        let target = sys.path().join("devices/pci0000:00/usb2/2-1/host6/block/sdc");
        std::fs::create_dir_all(&target).unwrap();
        symlink(&target, sys.path().join("sdc")).unwrap();

        assert_eq!(classify_drive("/data", "/dev/sdc1", sys.path()), DriveKind::Usb);
    }

    #[test]
    fn unknown_device_is_internal() {
        let sys = tempfile::tempdir().unwrap();
        assert_eq!(classify_drive("/", "/dev/sda2", sys.path()), DriveKind::Internal);
        assert_eq!(classify_drive("/home", "tmpfs", sys.path()), DriveKind::Internal);
    }

    #[test]
    fn block_names_strip_partitions() {
        assert_eq!(block_device_name("/dev/sdb1"), Some("sdb"));
        assert_eq!(block_device_name("/dev/nvme0n1p2"), Some("nvme0n1"));
        assert_eq!(block_device_name("/dev/mmcblk0p1"), Some("mmcblk0"));
        assert_eq!(block_device_name("/dev/sda"), Some("sda"));
        assert_eq!(block_device_name("/dev/nvme0n1"), Some("nvme0n1"));
        assert_eq!(block_device_name("/dev/mmcblk0"), Some("mmcblk0"));
        assert_eq!(block_device_name("/dev/loop0"), Some("loop0"));
        assert_eq!(block_device_name("/dev/xvda1"), Some("xvda"));
        assert_eq!(block_device_name("/dev/"), None);
    }

    #[test]
    fn record_rounds_values() {
        let gib = 1024u64 * 1024 * 1024;
        let record = StorageRecord::from_bytes(
            "/dev/sda1".into(),
            "/".into(),
            "ext4".into(),
            3 * gib,
            gib,
            DriveKind::Internal,
        );
        assert_eq!(record.total_gb, 3.0);
        assert_eq!(record.used_gb, 2.0);
        assert_eq!(record.free_gb, 1.0);
        assert_eq!(record.used_percent, 66.7);
    }
}
