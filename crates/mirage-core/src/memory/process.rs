//! Opened handles to a foreign process
//!
//! A [`ProcessHandle`] owns whatever the platform needs for the raw transfer
//! primitive and records the geometry of the main executable image.

use super::address::Address;
use crate::error::{Error, Result};

pub struct ProcessHandle {
    pub pid: u32,
    pub name: String,
    pub base_address: Address,
    pub image_size: usize,
    inner: platform::RawProcess,
}

impl ProcessHandle {
    /// Open a process by PID
    pub fn open(pid: u32) -> Result<Self> {
        let (inner, name, base_address, image_size) = platform::open(pid)?;
        Ok(Self {
            pid,
            name,
            base_address,
            image_size,
            inner,
        })
    }

    /// Find the first process whose executable name matches `name` (case-insensitive)
    pub fn find_by_name(name: &str) -> Result<Self> {
        let pid = platform::find_pid(name)?
            .ok_or_else(|| Error::ProcessNotFound(name.to_string()))?;
        Self::open(pid)
    }

    pub fn is_alive(&self) -> bool {
        self.inner.is_alive(self.pid)
    }

    pub(crate) fn read_memory(&self, address: Address, buffer: &mut [u8]) -> Result<()> {
        self.inner.read(address, buffer)
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("name", &self.name)
            .field("base_address", &self.base_address)
            .field("image_size", &self.image_size)
            .finish()
    }
}

#[cfg(target_os = "windows")]
mod platform {
    use std::ffi::c_void;

    use windows::Win32::Foundation::{CloseHandle, HANDLE, STILL_ACTIVE};
    use windows::Win32::System::Diagnostics::Debug::ReadProcessMemory;
    use windows::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, MODULEENTRY32W, Module32FirstW, PROCESSENTRY32W,
        Process32FirstW, Process32NextW, TH32CS_SNAPMODULE, TH32CS_SNAPMODULE32,
        TH32CS_SNAPPROCESS,
    };
    use windows::Win32::System::Threading::{
        GetExitCodeProcess, OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_VM_READ,
    };

    use super::Address;
    use crate::error::{Error, Result};

    /// Raw handle value; `HANDLE` itself is not `Send`
    pub(super) struct RawProcess(usize);

    impl RawProcess {
        fn handle(&self) -> HANDLE {
            HANDLE(self.0 as *mut c_void)
        }

        pub(super) fn read(&self, address: Address, buffer: &mut [u8]) -> Result<()> {
            let mut bytes_read = 0usize;
            // SAFETY: the buffer pointer and length come from a live mutable slice.
            unsafe {
                ReadProcessMemory(
                    self.handle(),
                    address.value() as *const c_void,
                    buffer.as_mut_ptr().cast(),
                    buffer.len(),
                    Some(&mut bytes_read),
                )
            }
            .map_err(|e| Error::read_failed(address.value(), e.to_string()))?;

            if bytes_read != buffer.len() {
                return Err(Error::read_failed(
                    address.value(),
                    format!("partial read: {} of {} bytes", bytes_read, buffer.len()),
                ));
            }
            Ok(())
        }

        pub(super) fn is_alive(&self, _pid: u32) -> bool {
            let mut exit_code = 0u32;
            // SAFETY: exit_code is a valid out pointer for the duration of the call.
            let ok = unsafe { GetExitCodeProcess(self.handle(), &mut exit_code) }.is_ok();
            ok && exit_code == STILL_ACTIVE.0 as u32
        }
    }

    impl Drop for RawProcess {
        fn drop(&mut self) {
            // SAFETY: the handle was returned by OpenProcess and is closed once.
            unsafe {
                let _ = CloseHandle(self.handle());
            }
        }
    }

    fn wide_to_string(wide: &[u16]) -> String {
        let len = wide.iter().position(|&c| c == 0).unwrap_or(wide.len());
        String::from_utf16_lossy(&wide[..len])
    }

    pub(super) fn find_pid(name: &str) -> Result<Option<u32>> {
        // SAFETY: snapshot handle is closed below; entry is sized per the API contract.
        unsafe {
            let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0)
                .map_err(|e| Error::ProcessNotFound(e.to_string()))?;
            let mut entry = PROCESSENTRY32W {
                dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
                ..Default::default()
            };

            let mut found = None;
            if Process32FirstW(snapshot, &mut entry).is_ok() {
                loop {
                    if wide_to_string(&entry.szExeFile).eq_ignore_ascii_case(name) {
                        found = Some(entry.th32ProcessID);
                        break;
                    }
                    if Process32NextW(snapshot, &mut entry).is_err() {
                        break;
                    }
                }
            }
            let _ = CloseHandle(snapshot);
            Ok(found)
        }
    }

    pub(super) fn open(pid: u32) -> Result<(RawProcess, String, Address, usize)> {
        // SAFETY: handles are wrapped (process) or closed (snapshot) before returning.
        unsafe {
            let handle = OpenProcess(PROCESS_VM_READ | PROCESS_QUERY_INFORMATION, false, pid)
                .map_err(|e| Error::ProcessOpenFailed(format!("pid {}: {}", pid, e)))?;
            let process = RawProcess(handle.0 as usize);

            let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPMODULE | TH32CS_SNAPMODULE32, pid)
                .map_err(|e| Error::ProcessOpenFailed(format!("module snapshot: {}", e)))?;
            let mut module = MODULEENTRY32W {
                dwSize: std::mem::size_of::<MODULEENTRY32W>() as u32,
                ..Default::default()
            };
            let first = Module32FirstW(snapshot, &mut module);
            let _ = CloseHandle(snapshot);
            first.map_err(|e| Error::ProcessOpenFailed(format!("main module: {}", e)))?;

            Ok((
                process,
                wide_to_string(&module.szModule),
                Address::new(module.modBaseAddr as u64),
                module.modBaseSize as usize,
            ))
        }
    }
}

#[cfg(target_os = "linux")]
mod platform {
    use std::fs::{self, File};
    use std::os::unix::fs::FileExt;
    use std::path::{Path, PathBuf};

    use super::Address;
    use crate::error::{Error, Result};

    pub(super) struct RawProcess {
        mem: File,
    }

    impl RawProcess {
        pub(super) fn read(&self, address: Address, buffer: &mut [u8]) -> Result<()> {
            let mut filled = 0usize;
            while filled < buffer.len() {
                let offset = address.value() + filled as u64;
                match self.mem.read_at(&mut buffer[filled..], offset) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) => return Err(Error::read_failed(address.value(), e.to_string())),
                }
            }
            if filled != buffer.len() {
                return Err(Error::read_failed(
                    address.value(),
                    format!("partial read: {} of {} bytes", filled, buffer.len()),
                ));
            }
            Ok(())
        }

        pub(super) fn is_alive(&self, pid: u32) -> bool {
            Path::new(&format!("/proc/{}", pid)).exists()
        }
    }

    fn exe_name(pid: u32) -> Option<String> {
        let exe = fs::read_link(format!("/proc/{}/exe", pid)).ok()?;
        exe.file_name().map(|n| n.to_string_lossy().into_owned())
    }

    pub(super) fn find_pid(name: &str) -> Result<Option<u32>> {
        for entry in fs::read_dir("/proc")? {
            let Ok(entry) = entry else { continue };
            let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            let comm = fs::read_to_string(entry.path().join("comm")).unwrap_or_default();
            if comm.trim().eq_ignore_ascii_case(name)
                || exe_name(pid).is_some_and(|exe| exe.eq_ignore_ascii_case(name))
            {
                return Ok(Some(pid));
            }
        }
        Ok(None)
    }

    /// Span of all mappings backed by `exe`, as (base, size)
    fn image_span(maps: &str, exe: &Path) -> Option<(u64, u64)> {
        let mut span: Option<(u64, u64)> = None;
        for line in maps.lines() {
            let mut fields = line.split_whitespace();
            let Some(range) = fields.next() else { continue };
            let Some(path) = fields.nth(4) else { continue };
            if Path::new(path) != exe {
                continue;
            }
            let Some((start, end)) = range.split_once('-') else { continue };
            let (Ok(start), Ok(end)) = (u64::from_str_radix(start, 16), u64::from_str_radix(end, 16))
            else {
                continue;
            };
            span = Some(match span {
                Some((lo, hi)) => (lo.min(start), hi.max(end)),
                None => (start, end),
            });
        }
        span.map(|(lo, hi)| (lo, hi - lo))
    }

    pub(super) fn open(pid: u32) -> Result<(RawProcess, String, Address, usize)> {
        let exe: PathBuf = fs::read_link(format!("/proc/{}/exe", pid))
            .map_err(|e| Error::ProcessOpenFailed(format!("pid {}: {}", pid, e)))?;
        let maps = fs::read_to_string(format!("/proc/{}/maps", pid))
            .map_err(|e| Error::ProcessOpenFailed(format!("pid {} maps: {}", pid, e)))?;
        let (base, size) = image_span(&maps, &exe).ok_or_else(|| {
            Error::ProcessOpenFailed(format!("no mapping for {}", exe.display()))
        })?;
        let mem = File::open(format!("/proc/{}/mem", pid))
            .map_err(|e| Error::ProcessOpenFailed(format!("pid {} mem: {}", pid, e)))?;
        let name = exe
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok((RawProcess { mem }, name, Address::new(base), size as usize))
    }

}

#[cfg(not(any(target_os = "windows", target_os = "linux")))]
mod platform {
    use super::Address;
    use crate::error::{Error, Result};

    pub(super) struct RawProcess;

    impl RawProcess {
        pub(super) fn read(&self, address: Address, _buffer: &mut [u8]) -> Result<()> {
            Err(Error::read_failed(address.value(), "unsupported platform"))
        }

        pub(super) fn is_alive(&self, _pid: u32) -> bool {
            false
        }
    }

    pub(super) fn find_pid(_name: &str) -> Result<Option<u32>> {
        Ok(None)
    }

    pub(super) fn open(pid: u32) -> Result<(RawProcess, String, Address, usize)> {
        Err(Error::ProcessOpenFailed(format!(
            "pid {}: unsupported platform",
            pid
        )))
    }
}
