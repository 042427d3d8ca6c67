//! Cross-process wake-up signal, backed by a multicast UDP socket.
//!
//! A [`Notifier`] bound to the same multicast group and port in every
//! process gives writers a way to wake all readers without knowing how many
//! there are or where they live. The payload is always empty: this is a
//! signal, not a channel, and [`Notifier::send`] / [`Notifier::wait`] /
//! [`Notifier::peek`] collapse an arbitrary number of pending wakes into
//! "at least one happened".
//!
//! Implemented directly over `libc` socket calls rather than
//! `std::net::UdpSocket` because a genuinely non-blocking `MSG_PEEK` receive
//! of a zero-byte datagram is not exposed by the safe std API.

use std::mem::{size_of, zeroed};
use std::net::Ipv4Addr;
use std::os::fd::RawFd;

use crate::error::SysError;

pub struct Notifier {
    fd: RawFd,
}

fn sockaddr_in(addr: Ipv4Addr, port: u16) -> libc::sockaddr_in {
    let mut sa: libc::sockaddr_in = unsafe { zeroed() };
    sa.sin_family = libc::AF_INET as libc::sa_family_t;
    sa.sin_port = port.to_be();
    sa.sin_addr.s_addr = u32::from_ne_bytes(addr.octets());
    sa
}

impl Notifier {
    /// Opens a UDP socket, joins `multicast_addr` on `local_if`, and binds
    /// it to `port` so both sends and receives use the same group.
    pub fn bind(multicast_addr: Ipv4Addr, port: u16, local_if: Ipv4Addr) -> Result<Self, SysError> {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
        if fd < 0 {
            return Err(SysError::NotifyBind {
                addr: format!("{multicast_addr}:{port}"),
                source: std::io::Error::last_os_error(),
            });
        }

        let on: libc::c_int = 1;
        unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &on as *const _ as *const libc::c_void,
                size_of::<libc::c_int>() as u32,
            );
        }

        let bind_addr = sockaddr_in(Ipv4Addr::UNSPECIFIED, port);
        let rc = unsafe {
            libc::bind(
                fd,
                &bind_addr as *const _ as *const libc::sockaddr,
                size_of::<libc::sockaddr_in>() as u32,
            )
        };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(SysError::NotifyBind {
                addr: format!("{multicast_addr}:{port}"),
                source: err,
            });
        }

        let mreq = libc::ip_mreq {
            imr_multiaddr: libc::in_addr {
                s_addr: u32::from_ne_bytes(multicast_addr.octets()),
            },
            imr_interface: libc::in_addr {
                s_addr: u32::from_ne_bytes(local_if.octets()),
            },
        };
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::IPPROTO_IP,
                libc::IP_ADD_MEMBERSHIP,
                &mreq as *const _ as *const libc::c_void,
                size_of::<libc::ip_mreq>() as u32,
            )
        };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(SysError::NotifyBind {
                addr: format!("{multicast_addr}:{port}"),
                source: err,
            });
        }

        let if_addr = libc::in_addr {
            s_addr: u32::from_ne_bytes(local_if.octets()),
        };
        unsafe {
            libc::setsockopt(
                fd,
                libc::IPPROTO_IP,
                libc::IP_MULTICAST_IF,
                &if_addr as *const _ as *const libc::c_void,
                size_of::<libc::in_addr>() as u32,
            );
        }

        tracing::debug!(%multicast_addr, port, %local_if, "notifier bound to multicast group");
        Ok(Self { fd })
    }

    /// Sends a zero-byte wake-up to the group. Non-blocking; a full send
    /// buffer manifests as `WouldBlock`, which is dropped silently — a
    /// pending wake already covers the next waiter.
    pub fn send(&self, multicast_addr: Ipv4Addr, port: u16) -> Result<(), SysError> {
        let dest = sockaddr_in(multicast_addr, port);
        let rc = unsafe {
            libc::sendto(
                self.fd,
                std::ptr::null(),
                0,
                libc::MSG_DONTWAIT,
                &dest as *const _ as *const libc::sockaddr,
                size_of::<libc::sockaddr_in>() as u32,
            )
        };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(SysError::NotifySend(err));
        }
        Ok(())
    }

    /// Blocks until at least one datagram has arrived, draining it. Any
    /// number of sends that arrived since the last `wait`/`peek` collapse
    /// into this single wake.
    pub fn wait(&self) -> Result<(), SysError> {
        loop {
            let rc = unsafe { libc::recv(self.fd, std::ptr::null_mut(), 0, 0) };
            if rc >= 0 {
                return Ok(());
            }
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(SysError::NotifyRecv(err));
        }
    }

    /// Non-blocking test for a pending wake, without consuming it.
    pub fn peek(&self) -> Result<bool, SysError> {
        let rc = unsafe {
            libc::recv(
                self.fd,
                std::ptr::null_mut(),
                0,
                libc::MSG_PEEK | libc::MSG_DONTWAIT,
            )
        };
        if rc >= 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock {
            return Ok(false);
        }
        Err(SysError::NotifyRecv(err))
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
