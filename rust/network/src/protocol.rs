//! Descriptor passing over Unix stream sockets
//!
//! The region descriptor travels as SCM_RIGHTS ancillary data attached to the
//! handshake bytes, so both arrive in a single `sendmsg`.

use nix::sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags, UnixAddr};
use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use tokio::io::{AsyncReadExt, AsyncWriteExt, Interest};
use tokio::net::UnixStream;
use tracing::warn;

#[cfg(any(target_os = "linux", target_os = "android"))]
fn send_flags() -> MsgFlags {
    MsgFlags::MSG_NOSIGNAL
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn send_flags() -> MsgFlags {
    MsgFlags::empty()
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn recv_flags() -> MsgFlags {
    MsgFlags::MSG_CMSG_CLOEXEC
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn recv_flags() -> MsgFlags {
    MsgFlags::empty()
}

/// Mark a received descriptor close-on-exec where the receive flag is unavailable
#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn set_cloexec(fd: &OwnedFd) -> io::Result<()> {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    Ok(())
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn set_cloexec(_fd: &OwnedFd) -> io::Result<()> {
    Ok(())
}

/// Send `bytes` with `fd` attached, writing any unsent tail afterwards.
pub async fn send_with_descriptor(stream: &mut UnixStream, bytes: &[u8], fd: BorrowedFd<'_>) -> io::Result<()> {
    let raw = [fd.as_raw_fd()];
    let socket = stream.as_raw_fd();
    let sent = loop {
        stream.writable().await?;
        let result = stream.try_io(Interest::WRITABLE, || {
            let iov = [IoSlice::new(bytes)];
            let cmsgs = [ControlMessage::ScmRights(&raw)];
            sendmsg::<UnixAddr>(socket, &iov, &cmsgs, send_flags(), None).map_err(io::Error::from)
        });

        match result {
            Ok(sent) => break sent,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    };

    if sent < bytes.len() {
        stream.write_all(&bytes[sent..]).await?;
    }
    Ok(())
}

/// Receive into `buf`, returning the byte count and the first attached descriptor.
///
/// Extra descriptors are closed. A short read is completed from the stream so
/// the caller always gets either a full buffer or a closed connection.
pub async fn recv_with_descriptor(stream: &mut UnixStream, buf: &mut [u8]) -> io::Result<(usize, Option<OwnedFd>)> {
    let socket = stream.as_raw_fd();
    let (received, descriptor) = loop {
        stream.readable().await?;
        let result = stream.try_io(Interest::READABLE, || recv_once(socket, buf));

        match result {
            Ok(received) => break received,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    };

    if let Some(fd) = &descriptor {
        set_cloexec(fd)?;
    }

    let mut filled = received;
    while received > 0 && filled < buf.len() {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    Ok((filled, descriptor))
}

fn recv_once(socket: RawFd, buf: &mut [u8]) -> io::Result<(usize, Option<OwnedFd>)> {
    let mut cmsg_buffer = nix::cmsg_space!([RawFd; 1]);
    let mut iov = [IoSliceMut::new(buf)];

    let msg = recvmsg::<UnixAddr>(socket, &mut iov, Some(&mut cmsg_buffer), recv_flags())?;

    let mut descriptor = None;
    for cmsg in msg.cmsgs() {
        if let ControlMessageOwned::ScmRights(fds) = cmsg {
            for raw in fds {
                // Safety: the kernel just installed these descriptors for us
                let owned = unsafe { OwnedFd::from_raw_fd(raw) };
                if descriptor.is_none() {
                    descriptor = Some(owned);
                } else {
                    warn!("Closing unexpected extra descriptor {}", raw);
                }
            }
        }
    }

    if msg.flags.contains(MsgFlags::MSG_CTRUNC) {
        warn!("Ancillary data truncated while receiving handshake");
    }

    Ok((msg.bytes, descriptor))
}
