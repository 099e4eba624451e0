//! Windows native API helpers for process management.

use windows::Win32::Foundation::{CloseHandle, ERROR_INSUFFICIENT_BUFFER, NO_ERROR, STILL_ACTIVE};
use windows::Win32::NetworkManagement::IpHelper::{
    GetExtendedTcpTable, MIB_TCP6ROW_OWNER_PID, MIB_TCP6TABLE_OWNER_PID, MIB_TCPROW_OWNER_PID,
    MIB_TCPTABLE_OWNER_PID, TCP_TABLE_OWNER_PID_LISTENER,
};
use windows::Win32::Networking::WinSock::{AF_INET, AF_INET6};
use windows::Win32::System::Threading::{
    GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
};

/// Retries when the TCP table grows between the size query and the fetch.
const TABLE_FETCH_RETRIES: usize = 4;

/// Fetch the extended TCP listener table for one address family.
fn fetch_listener_table(af: u32) -> Option<Vec<u8>> {
    for _ in 0..TABLE_FETCH_RETRIES {
        let mut size: u32 = 0;

        // Size query: documented to return ERROR_INSUFFICIENT_BUFFER and
        // fill `size` with the required byte count.
        let ret = unsafe {
            GetExtendedTcpTable(None, &mut size, false, af, TCP_TABLE_OWNER_PID_LISTENER, 0)
        };
        if ret != ERROR_INSUFFICIENT_BUFFER.0 || size == 0 {
            return None;
        }

        let mut buffer = vec![0u8; size as usize];
        let ret = unsafe {
            GetExtendedTcpTable(
                Some(buffer.as_mut_ptr().cast()),
                &mut size,
                false,
                af,
                TCP_TABLE_OWNER_PID_LISTENER,
                0,
            )
        };

        if ret == NO_ERROR.0 {
            buffer.truncate(size as usize);
            return Some(buffer);
        }
        if ret != ERROR_INSUFFICIENT_BUFFER.0 {
            return None;
        }
        // Table grew between the two calls; retry with a fresh size.
    }
    None
}

/// Walk the rows of a fetched table. `read_row` decodes one row into
/// (local port, owning pid); `table_offset`/`row_size` come from the
/// matching MIB table/row types. Rows are read unaligned, so the byte
/// buffer needs no particular alignment.
fn find_listener(
    buffer: &[u8],
    table_offset: usize,
    row_size: usize,
    read_row: unsafe fn(*const u8) -> (u16, u32),
    port: u16,
) -> Option<u32> {
    if buffer.len() < std::mem::size_of::<u32>() {
        return None;
    }
    let entries = unsafe { std::ptr::read_unaligned(buffer.as_ptr() as *const u32) } as usize;

    for i in 0..entries {
        let offset = table_offset.checked_add(i.checked_mul(row_size)?)?;
        if offset.checked_add(row_size)? > buffer.len() {
            break;
        }
        let (local_port, pid) = unsafe { read_row(buffer.as_ptr().add(offset)) };
        if local_port == port {
            return Some(pid);
        }
    }
    None
}

unsafe fn read_row_v4(ptr: *const u8) -> (u16, u32) {
    let row = std::ptr::read_unaligned(ptr as *const MIB_TCPROW_OWNER_PID);
    // dwLocalPort is network byte order; mask to the lower 16 bits.
    (
        u16::from_be((row.dwLocalPort & 0xFFFF) as u16),
        row.dwOwningPid,
    )
}

unsafe fn read_row_v6(ptr: *const u8) -> (u16, u32) {
    let row = std::ptr::read_unaligned(ptr as *const MIB_TCP6ROW_OWNER_PID);
    (
        u16::from_be((row.dwLocalPort & 0xFFFF) as u16),
        row.dwOwningPid,
    )
}

/// Get the PID listening on the given port (checks IPv4, then IPv6).
pub fn pid_on_port(port: u16) -> Option<u32> {
    fetch_listener_table(AF_INET.0 as u32)
        .and_then(|buffer| {
            find_listener(
                &buffer,
                std::mem::offset_of!(MIB_TCPTABLE_OWNER_PID, table),
                std::mem::size_of::<MIB_TCPROW_OWNER_PID>(),
                read_row_v4,
                port,
            )
        })
        .or_else(|| {
            fetch_listener_table(AF_INET6.0 as u32).and_then(|buffer| {
                find_listener(
                    &buffer,
                    std::mem::offset_of!(MIB_TCP6TABLE_OWNER_PID, table),
                    std::mem::size_of::<MIB_TCP6ROW_OWNER_PID>(),
                    read_row_v6,
                    port,
                )
            })
        })
}

/// Check if a process is alive via OpenProcess + GetExitCodeProcess.
pub fn is_process_alive(pid: u32) -> bool {
    unsafe {
        match OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid) {
            Ok(handle) => {
                let mut exit_code: u32 = 0;
                let alive = GetExitCodeProcess(handle, &mut exit_code).is_ok()
                    && (exit_code as i32) == STILL_ACTIVE.0;
                let _ = CloseHandle(handle);
                alive
            }
            Err(_) => false,
        }
    }
}
