//! Raw `AF_BLUETOOTH`/`SOCK_RAW` HCI socket, adapted from the teacher
//! crate's `socket.rs`. The bind/filter/syscall plumbing is unchanged; the
//! event-header parsing the teacher did here is dropped in favor of
//! `BlueZHal`'s reader thread doing a single raw `recv` per datagram and
//! demuxing by the leading type byte (see `bluez/mod.rs`).

use libc::{
    c_int, c_void, sa_family_t, sockaddr_storage, socklen_t, AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_RAW,
};
use socket2::{Domain, Protocol, SockAddr, Socket as Socket2, Type};
use std::io::{Error, IoSlice, Read, Result, Write};
use std::mem::zeroed;
use std::os::fd::AsRawFd;
use std::ptr::{addr_of, addr_of_mut, copy_nonoverlapping};

use super::filter::HciFilter;

const SOL_HCI: c_int = 0;
const HCI_FILTER: c_int = 2;
const PROTO_HCI: c_int = 1;

macro_rules! syscall {
    ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
        #[allow(unused_unsafe)]
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

#[repr(C)]
struct HciAddr {
    family: sa_family_t,
    device: std::os::raw::c_ushort,
    channel: std::os::raw::c_ushort,
}

impl HciAddr {
    fn as_sock_addr(&self) -> SockAddr {
        unsafe {
            let mut storage: sockaddr_storage = zeroed();
            copy_nonoverlapping(self, &mut storage as *mut _ as *mut Self, 1);
            let len: u32 = size_of::<Self>().try_into().unwrap();
            SockAddr::new(storage, len)
        }
    }
}

/// One raw HCI socket bound to a controller index (`hciN`).
pub struct Socket(Socket2);

impl Socket {
    pub fn open(device_id: u16) -> Result<Socket> {
        let domain = Domain::from(AF_BLUETOOTH);
        let ty = Type::from(SOCK_RAW | SOCK_CLOEXEC);
        let protocol = Protocol::from(PROTO_HCI);

        let socket = Socket2::new(domain, ty, Some(protocol))?;
        let address =
            HciAddr { family: AF_BLUETOOTH as sa_family_t, device: device_id, channel: 0 };
        socket.bind(&address.as_sock_addr())?;

        Ok(Socket(socket))
    }

    pub fn send(&self, buf: &[u8]) -> Result<usize> {
        self.0.send(buf)
    }

    pub fn send_vectored(&self, bufs: &[IoSlice<'_>]) -> Result<usize> {
        self.0.send_vectored(bufs)
    }

    pub fn get_filter(&self) -> Result<HciFilter> {
        let mut filter = HciFilter::default();
        let mut filter_size = size_of::<HciFilter>() as socklen_t;

        syscall!(getsockopt(
            self.0.as_raw_fd(),
            SOL_HCI,
            HCI_FILTER,
            addr_of_mut!(filter) as *mut c_void,
            &mut filter_size
        ))
        .map(|_| filter)
    }

    pub fn set_filter(&self, filter: &HciFilter) -> Result<()> {
        let filter_size = size_of::<HciFilter>() as socklen_t;

        syscall!(setsockopt(
            self.0.as_raw_fd(),
            SOL_HCI,
            HCI_FILTER,
            addr_of!(filter).cast(),
            filter_size
        ))
        .map(|_| ())
    }

    /// Clones the underlying fd so a reader thread can own its own `Read`
    /// handle while the original stays with the caller for writes.
    pub fn try_clone(&self) -> Result<Socket> {
        self.0.try_clone().map(Socket)
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> c_int {
        self.0.as_raw_fd()
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.0.read(buf)
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
