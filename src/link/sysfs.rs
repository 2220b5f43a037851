use super::{LinkError, LinkSource, LinkStats};
use camino::{Utf8Path, Utf8PathBuf};
use std::{fs, io::ErrorKind, str::FromStr};
use tracing::{debug, trace};

/// 通过 `/sys/class/net/<iface>` 读取接口索引与累计字节数
#[derive(Debug, Clone)]
pub struct SysfsLinks {
    root: Utf8PathBuf,
}

impl SysfsLinks {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_value<T: FromStr>(path: Utf8PathBuf) -> Result<T, LinkError> {
        let raw = fs::read_to_string(&path).map_err(|source| LinkError::Io {
            path: path.clone(),
            source,
        })?;
        raw.trim().parse().map_err(|_| LinkError::Parse {
            path,
            value: raw.trim().to_string(),
        })
    }

    fn read_link(dir: &Utf8Path, name: &str) -> Result<LinkStats, LinkError> {
        let index = Self::read_value::<u32>(dir.join("ifindex"))?;
        let tx_bytes = Self::read_value::<u64>(dir.join("statistics/tx_bytes"))?;
        let rx_bytes = Self::read_value::<u64>(dir.join("statistics/rx_bytes"))?;
        Ok(LinkStats::new(index, name, tx_bytes, rx_bytes))
    }
}

impl Default for SysfsLinks {
    fn default() -> Self {
        Self::new("/sys/class/net")
    }
}

impl LinkSource for SysfsLinks {
    fn list(&mut self) -> Result<Vec<LinkStats>, LinkError> {
        let entries = self.root.read_dir_utf8().map_err(|source| LinkError::Io {
            path: self.root.clone(),
            source,
        })?;
        let mut links = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| LinkError::Io {
                path: self.root.clone(),
                source,
            })?;
            // bonding_masters 之类的普通文件不是接口
            if !entry.path().is_dir() {
                continue;
            }
            match Self::read_link(entry.path(), entry.file_name()) {
                Ok(link) => links.push(link),
                // 枚举和读取之间接口被删掉了
                Err(LinkError::Io { path, source }) if source.kind() == ErrorKind::NotFound => {
                    debug!("{} vanished while enumerating: {}", entry.file_name(), path);
                }
                Err(err) => return Err(err),
            }
        }
        links.sort_by_key(|link| link.identity.index);
        trace!("enumerated {} links under {}", links.len(), self.root);
        Ok(links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::Builder;

    fn mock_iface(root: &Utf8Path, name: &str, index: u32, tx: u64, rx: u64) {
        let dir = root.join(name);
        fs::create_dir_all(dir.join("statistics")).unwrap();
        fs::write(dir.join("ifindex"), format!("{index}\n")).unwrap();
        fs::write(dir.join("statistics/tx_bytes"), format!("{tx}\n")).unwrap();
        fs::write(dir.join("statistics/rx_bytes"), format!("{rx}\n")).unwrap();
    }

    #[test]
    fn enumerate_sorted_by_index() -> Result<()> {
        let dir = Builder::new().tempdir()?;
        let root: Utf8PathBuf = dir.path().to_path_buf().try_into()?;
        mock_iface(&root, "eth1", 3, 1500, 20);
        mock_iface(&root, "lo", 1, 7, 7);
        fs::write(root.join("bonding_masters"), "\n")?;

        let links = SysfsLinks::new(root.clone()).list()?;
        assert_eq!(
            links,
            vec![LinkStats::new(1, "lo", 7, 7), LinkStats::new(3, "eth1", 1500, 20)]
        );
        Ok(())
    }

    #[test]
    fn garbage_counter_is_parse_error() -> Result<()> {
        let dir = Builder::new().tempdir()?;
        let root: Utf8PathBuf = dir.path().to_path_buf().try_into()?;
        mock_iface(&root, "eth0", 2, 1, 1);
        fs::write(root.join("eth0/statistics/tx_bytes"), "lots")?;

        let err = SysfsLinks::new(root).list().unwrap_err();
        assert!(matches!(err, LinkError::Parse { value, .. } if value == "lots"));
        Ok(())
    }

    #[test]
    fn vanished_interface_is_skipped() -> Result<()> {
        let dir = Builder::new().tempdir()?;
        let root: Utf8PathBuf = dir.path().to_path_buf().try_into()?;
        mock_iface(&root, "eth0", 2, 10, 20);
        // 目录还在但属性文件已经没了
        fs::create_dir(root.join("veth9"))?;

        let links = SysfsLinks::new(root).list()?;
        assert_eq!(links, vec![LinkStats::new(2, "eth0", 10, 20)]);
        Ok(())
    }

    #[test]
    fn missing_root_is_io_error() {
        let err = SysfsLinks::new("/definitely/not/here").list().unwrap_err();
        assert!(matches!(err, LinkError::Io { .. }));
    }
}
