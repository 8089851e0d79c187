//! `IP_PKTINFO` datagram I/O
//!
//! A socket bound to `0.0.0.0` does not know which local address a query was
//! sent to, and a plain `send_to` lets the kernel pick the reply source.
//! With `IP_PKTINFO` every received datagram carries its destination address
//! and every reply is sent from an explicit source address, so the response
//! leaves from exactly the address the client queried.

use std::io;
use std::mem;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::unix::io::AsRawFd;

use socket2::Socket;

/// Room for one `in_pktinfo` control message, suitably aligned
type ControlBuf = [u64; 16];

/// Ask the kernel to attach `in_pktinfo` to received datagrams
pub(crate) fn enable(socket: &Socket) -> io::Result<()> {
    let on: libc::c_int = 1;

    // SAFETY: the fd is open and `on` outlives the call
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IP,
            libc::IP_PKTINFO,
            &on as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Receive one datagram: `(len, source, destination ip)`
///
/// The destination is `None` if the kernel attached no packet info.
pub(crate) fn recv_with_dst(
    socket: &std::net::UdpSocket,
    buf: &mut [u8],
) -> io::Result<(usize, SocketAddr, Option<IpAddr>)> {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };
    // SAFETY: all-zero is a valid sockaddr_in and msghdr
    let mut src: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut control: ControlBuf = [0; 16];
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_name = &mut src as *mut libc::sockaddr_in as *mut libc::c_void;
    msg.msg_namelen = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = mem::size_of_val(&control) as _;

    // SAFETY: every pointer in `msg` refers to a live local buffer
    let n = unsafe { libc::recvmsg(socket.as_raw_fd(), &mut msg, 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    let mut dst = None;
    // SAFETY: `msg` was filled by recvmsg; the CMSG helpers stay within
    // `msg_controllen`
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::IPPROTO_IP && (*cmsg).cmsg_type == libc::IP_PKTINFO {
                let info = (libc::CMSG_DATA(cmsg) as *const libc::in_pktinfo).read_unaligned();
                dst = Some(IpAddr::V4(Ipv4Addr::from(u32::from_be(info.ipi_addr.s_addr))));
                break;
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    Ok((n as usize, SocketAddr::V4(from_sockaddr(&src)), dst))
}

/// Send `packet` to `to` with `from` as the source address
///
/// An unspecified `from` leaves the choice to the kernel.
pub(crate) fn send_from(
    socket: &std::net::UdpSocket,
    packet: &[u8],
    to: SocketAddr,
    from: IpAddr,
) -> io::Result<()> {
    let (SocketAddr::V4(to), IpAddr::V4(from)) = (to, from) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "only IPv4 envelopes are supported",
        ));
    };

    let dst = to_sockaddr(to);
    let mut iov = libc::iovec {
        iov_base: packet.as_ptr() as *mut libc::c_void,
        iov_len: packet.len(),
    };
    let mut control: ControlBuf = [0; 16];
    // SAFETY: all-zero is a valid msghdr
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_name = &dst as *const libc::sockaddr_in as *mut libc::c_void;
    msg.msg_namelen = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;

    // SAFETY: the control buffer is larger than CMSG_SPACE(in_pktinfo) and
    // aligned for cmsghdr
    let n = unsafe {
        msg.msg_controllen = libc::CMSG_SPACE(mem::size_of::<libc::in_pktinfo>() as u32) as _;
        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        if cmsg.is_null() {
            return Err(io::Error::new(io::ErrorKind::Other, "no room for packet info"));
        }
        (*cmsg).cmsg_level = libc::IPPROTO_IP;
        (*cmsg).cmsg_type = libc::IP_PKTINFO;
        (*cmsg).cmsg_len = libc::CMSG_LEN(mem::size_of::<libc::in_pktinfo>() as u32) as _;
        (libc::CMSG_DATA(cmsg) as *mut libc::in_pktinfo).write_unaligned(libc::in_pktinfo {
            ipi_ifindex: 0,
            ipi_spec_dst: libc::in_addr {
                s_addr: u32::from(from).to_be(),
            },
            ipi_addr: libc::in_addr { s_addr: 0 },
        });

        libc::sendmsg(socket.as_raw_fd(), &msg, 0)
    };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn from_sockaddr(addr: &libc::sockaddr_in) -> SocketAddrV4 {
    SocketAddrV4::new(
        Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr)),
        u16::from_be(addr.sin_port),
    )
}

fn to_sockaddr(addr: SocketAddrV4) -> libc::sockaddr_in {
    // SAFETY: all-zero is a valid sockaddr_in
    let mut sa: libc::sockaddr_in = unsafe { mem::zeroed() };
    sa.sin_family = libc::AF_INET as libc::sa_family_t;
    sa.sin_port = addr.port().to_be();
    sa.sin_addr.s_addr = u32::from(*addr.ip()).to_be();
    sa
}
