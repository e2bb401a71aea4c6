//! IPv4 `IP_PKTINFO` plumbing for the UDP listener.
//!
//! A socket bound to the wildcard address learns, per datagram, which local
//! address the query was sent to, and can put that same address back as the
//! source of the reply. All calls are non-blocking and report `WouldBlock`
//! so they can run under `AsyncFd::try_io`.

use std::io;
use std::mem;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::unix::io::AsRawFd;

use socket2::Socket;

// room for one in_pktinfo message, aligned like cmsghdr
#[repr(C, align(8))]
struct ControlBuf([u8; 64]);

impl ControlBuf {
    fn new() -> Self {
        Self([0u8; 64])
    }
}

pub fn enable_pktinfo(socket: &Socket) -> io::Result<()> {
    let val: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IP,
            libc::IP_PKTINFO,
            &val as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Receives one datagram. Returns its length, the peer, and the local address
/// it was sent to when the kernel reported one.
pub fn try_recv_with_pktinfo(
    socket: &std::net::UdpSocket,
    buf: &mut [u8],
) -> io::Result<(usize, SocketAddr, Option<IpAddr>)> {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };
    let mut peer: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut control = ControlBuf::new();
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_name = &mut peer as *mut libc::sockaddr_in as *mut libc::c_void;
    msg.msg_namelen = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.0.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = control.0.len() as _;

    let n = unsafe { libc::recvmsg(socket.as_raw_fd(), &mut msg, libc::MSG_DONTWAIT) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    let from = SocketAddr::V4(SocketAddrV4::new(
        Ipv4Addr::from(u32::from_be(peer.sin_addr.s_addr)),
        u16::from_be(peer.sin_port),
    ));
    Ok((n as usize, from, local_destination(&msg).map(IpAddr::V4)))
}

// walks the control messages recvmsg filled in
fn local_destination(msg: &libc::msghdr) -> Option<Ipv4Addr> {
    let mut cmsg = unsafe { libc::CMSG_FIRSTHDR(msg) };
    while !cmsg.is_null() {
        let hdr = unsafe { &*cmsg };
        if hdr.cmsg_level == libc::IPPROTO_IP && hdr.cmsg_type == libc::IP_PKTINFO {
            let info = unsafe { (libc::CMSG_DATA(cmsg) as *const libc::in_pktinfo).read_unaligned() };
            let addr = Ipv4Addr::from(u32::from_be(info.ipi_addr.s_addr));
            // broadcast and multicast destinations cannot be a reply source
            if addr.is_unspecified() || addr.is_broadcast() || addr.is_multicast() {
                return None;
            }
            return Some(addr);
        }
        cmsg = unsafe { libc::CMSG_NXTHDR(msg, cmsg) };
    }
    None
}

/// Sends `buf` to `to`, pinning the source address to `local` when given.
/// Without a usable `local` the kernel picks the source as for `send_to`.
pub fn try_send_with_src_ip(
    socket: &std::net::UdpSocket,
    buf: &[u8],
    to: SocketAddr,
    local: Option<IpAddr>,
) -> io::Result<()> {
    let (SocketAddr::V4(to), Some(IpAddr::V4(local))) = (to, local) else {
        return socket.send_to(buf, to).map(|_| ());
    };

    let mut dst: libc::sockaddr_in = unsafe { mem::zeroed() };
    dst.sin_family = libc::AF_INET as libc::sa_family_t;
    dst.sin_port = to.port().to_be();
    dst.sin_addr.s_addr = u32::from(*to.ip()).to_be();

    let info = libc::in_pktinfo {
        ipi_ifindex: 0,
        ipi_spec_dst: libc::in_addr { s_addr: u32::from(local).to_be() },
        ipi_addr: libc::in_addr { s_addr: 0 },
    };

    let iov = libc::iovec {
        iov_base: buf.as_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };
    let mut control = ControlBuf::new();
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_name = &mut dst as *mut libc::sockaddr_in as *mut libc::c_void;
    msg.msg_namelen = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
    msg.msg_iov = &iov as *const libc::iovec as *mut libc::iovec;
    msg.msg_iovlen = 1;
    msg.msg_control = control.0.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = unsafe { libc::CMSG_SPACE(mem::size_of::<libc::in_pktinfo>() as u32) } as _;

    unsafe {
        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        if cmsg.is_null() {
            return socket.send_to(buf, SocketAddr::V4(to)).map(|_| ());
        }
        (*cmsg).cmsg_level = libc::IPPROTO_IP;
        (*cmsg).cmsg_type = libc::IP_PKTINFO;
        (*cmsg).cmsg_len = libc::CMSG_LEN(mem::size_of::<libc::in_pktinfo>() as u32) as _;
        (libc::CMSG_DATA(cmsg) as *mut libc::in_pktinfo).write_unaligned(info);
    }

    let n = unsafe { libc::sendmsg(socket.as_raw_fd(), &msg, libc::MSG_DONTWAIT) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
