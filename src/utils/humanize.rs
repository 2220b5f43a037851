/// 以 1024 为进制，向下取整
pub fn humanize_size(size: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if size < 1024 {
        return format!("{} B", size);
    }
    let mut size = size >> 10;
    for unit in &UNITS[..UNITS.len() - 1] {
        if size < 1024 {
            return format!("{} {}", size, unit);
        }
        size >>= 10;
    }
    format!("{} {}", size, UNITS[UNITS.len() - 1])
}
