use super::SettingsError;
use camino::Utf8PathBuf;
use directories::ProjectDirs;

/// 默认配置文件位置，文件本身可以不存在
pub fn default_config_path() -> Result<Utf8PathBuf, SettingsError> {
    let prj_dir =
        ProjectDirs::from("net", "srv6", "srv6_steer").ok_or(SettingsError::ConfigDirNotFound)?;
    let path = prj_dir.config_local_dir().join("config.toml");
    Utf8PathBuf::from_path_buf(path).map_err(|path| SettingsError::NonUtf8Path(path.display().to_string()))
}
