//! Library-injection bootstrap.
//!
//! Gets an agent library running inside a target process so the
//! protocol core has something to connect to: a linear sequence of OS
//! calls, no protocol involved. One operation, idempotent — injecting
//! a library the target already loaded reports `Ok(false)`.

use std::path::Path;

/// Errors from the injection bootstrap.
#[derive(Debug, thiserror::Error)]
pub enum InjectError {
    /// The library file does not exist or its path is not encodable.
    #[error("library path invalid: {0}")]
    InvalidLibrary(String),

    /// Could not open or inspect the target process.
    #[error("failed to open process {pid}: {detail}")]
    OpenProcess { pid: u32, detail: String },

    /// A remote memory operation failed during bootstrap.
    #[error("remote memory operation failed: {0}")]
    RemoteMemory(String),

    /// The remote loader thread could not be created or did not
    /// finish.
    #[error("remote loader thread failed: {0}")]
    RemoteThread(String),

    /// Injection is not available on this platform.
    #[error("library injection not supported on this platform")]
    Unsupported,
}

pub type Result<T> = std::result::Result<T, InjectError>;

/// Load `library` into the target's address space and block until
/// loading completes.
///
/// Returns `Ok(false)` if the target already has the library loaded
/// (no-op), `Ok(true)` once a fresh load finished.
pub fn inject(pid: u32, library: &Path) -> Result<bool> {
    imp::inject(pid, library)
}

#[cfg(windows)]
mod imp {
    use std::ffi::CString;
    use std::path::Path;

    use tracing::{debug, info};
    use windows_sys::Win32::Foundation::{CloseHandle, FALSE, INVALID_HANDLE_VALUE};
    use windows_sys::Win32::System::Diagnostics::Debug::WriteProcessMemory;
    use windows_sys::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, Module32First, Module32Next, MODULEENTRY32, TH32CS_SNAPMODULE,
        TH32CS_SNAPMODULE32,
    };
    use windows_sys::Win32::System::LibraryLoader::{GetModuleHandleA, GetProcAddress};
    use windows_sys::Win32::System::Memory::{
        VirtualAllocEx, VirtualFreeEx, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
    };
    use windows_sys::Win32::System::Threading::{
        CreateRemoteThread, OpenProcess, WaitForSingleObject, INFINITE, PROCESS_CREATE_THREAD,
        PROCESS_QUERY_INFORMATION, PROCESS_VM_OPERATION, PROCESS_VM_READ, PROCESS_VM_WRITE,
    };

    use super::{InjectError, Result};

    pub(super) fn inject(pid: u32, library: &Path) -> Result<bool> {
        if !library.exists() {
            return Err(InjectError::InvalidLibrary(library.display().to_string()));
        }
        let library_path = library
            .to_str()
            .ok_or_else(|| InjectError::InvalidLibrary(library.display().to_string()))?;
        let library_cstr = CString::new(library_path)
            .map_err(|_| InjectError::InvalidLibrary(library.display().to_string()))?;
        let path_bytes = library_cstr.as_bytes_with_nul();

        if module_loaded(pid, library_path)? {
            debug!(pid, library = library_path, "library already loaded");
            return Ok(false);
        }

        // SAFETY: handles obtained here are checked before use and
        // closed on every exit path below.
        unsafe {
            let process = OpenProcess(
                PROCESS_CREATE_THREAD
                    | PROCESS_QUERY_INFORMATION
                    | PROCESS_VM_OPERATION
                    | PROCESS_VM_WRITE
                    | PROCESS_VM_READ,
                FALSE,
                pid,
            );
            if process.is_null() {
                return Err(InjectError::OpenProcess {
                    pid,
                    detail: "OpenProcess returned null".to_owned(),
                });
            }

            let result = inject_into(process, path_bytes);
            CloseHandle(process);
            result?;
        }

        info!(pid, library = library_path, "agent library loaded");
        Ok(true)
    }

    unsafe fn inject_into(
        process: windows_sys::Win32::Foundation::HANDLE,
        path_bytes: &[u8],
    ) -> Result<()> {
        let kernel32 = GetModuleHandleA("kernel32.dll\0".as_ptr());
        let load_library = GetProcAddress(kernel32, "LoadLibraryA\0".as_ptr())
            .ok_or_else(|| InjectError::RemoteThread("LoadLibraryA not found".to_owned()))?;

        let remote_path = VirtualAllocEx(
            process,
            std::ptr::null(),
            path_bytes.len(),
            MEM_COMMIT | MEM_RESERVE,
            PAGE_READWRITE,
        );
        if remote_path.is_null() {
            return Err(InjectError::RemoteMemory("VirtualAllocEx failed".to_owned()));
        }

        let mut written = 0usize;
        let wrote = WriteProcessMemory(
            process,
            remote_path,
            path_bytes.as_ptr().cast(),
            path_bytes.len(),
            &mut written,
        );
        if wrote == 0 || written != path_bytes.len() {
            VirtualFreeEx(process, remote_path, 0, MEM_RELEASE);
            return Err(InjectError::RemoteMemory(
                "WriteProcessMemory failed".to_owned(),
            ));
        }

        let thread = CreateRemoteThread(
            process,
            std::ptr::null(),
            0,
            Some(std::mem::transmute::<
                unsafe extern "system" fn() -> isize,
                unsafe extern "system" fn(*mut core::ffi::c_void) -> u32,
            >(load_library)),
            remote_path,
            0,
            std::ptr::null_mut(),
        );
        if thread == INVALID_HANDLE_VALUE || thread.is_null() {
            VirtualFreeEx(process, remote_path, 0, MEM_RELEASE);
            return Err(InjectError::RemoteThread(
                "CreateRemoteThread failed".to_owned(),
            ));
        }

        WaitForSingleObject(thread, INFINITE);
        CloseHandle(thread);
        VirtualFreeEx(process, remote_path, 0, MEM_RELEASE);
        Ok(())
    }

    /// Whether the target already has `library_path` loaded.
    fn module_loaded(pid: u32, library_path: &str) -> Result<bool> {
        // SAFETY: the snapshot handle is checked and closed before
        // return; MODULEENTRY32 is plain data initialized with dwSize.
        unsafe {
            let snapshot =
                CreateToolhelp32Snapshot(TH32CS_SNAPMODULE | TH32CS_SNAPMODULE32, pid);
            if snapshot == INVALID_HANDLE_VALUE {
                return Err(InjectError::OpenProcess {
                    pid,
                    detail: "module snapshot failed".to_owned(),
                });
            }

            let mut entry: MODULEENTRY32 = std::mem::zeroed();
            entry.dwSize = std::mem::size_of::<MODULEENTRY32>() as u32;
            let mut found = false;

            if Module32First(snapshot, &mut entry) != 0 {
                loop {
                    let name_len = entry
                        .szExePath
                        .iter()
                        .position(|&c| c == 0)
                        .unwrap_or(entry.szExePath.len());
                    let module_path: Vec<u8> =
                        entry.szExePath[..name_len].iter().map(|&c| c as u8).collect();
                    if let Ok(module_path) = std::str::from_utf8(&module_path) {
                        if module_path.eq_ignore_ascii_case(library_path) {
                            found = true;
                            break;
                        }
                    }
                    if Module32Next(snapshot, &mut entry) == 0 {
                        break;
                    }
                }
            }

            CloseHandle(snapshot);
            Ok(found)
        }
    }
}

#[cfg(not(windows))]
mod imp {
    use std::path::Path;

    use super::{InjectError, Result};

    pub(super) fn inject(_pid: u32, library: &Path) -> Result<bool> {
        if !library.exists() {
            return Err(InjectError::InvalidLibrary(library.display().to_string()));
        }
        Err(InjectError::Unsupported)
    }
}
