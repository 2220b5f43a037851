use std::io;

/// 5.11 之前的内核按 memlock 统计 BPF 内存，加载前要放开
#[cfg(unix)]
pub fn raise_memlock_rlimit() -> io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    // SAFETY: limit 在调用期间有效，setrlimit 不保留指针
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &limit) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn raise_memlock_rlimit() -> io::Result<()> {
    Ok(())
}
