//! 定长帧串口传输
//!
//! 蓝牙串口桥那一侧的传输面：termios 裸模式 8N1 无流控，读到的
//! 字节喂给帧解码器，解出的命令交给分发器。只有命令文本里含
//! `poll` 的才把应答编成响应帧写回，其余命令只执行副作用。

use piface_bridge::Dispatcher;
use piface_protocol::framing::{FrameDecoder, encode_response};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use tracing::{info, warn};

/// 串口读循环；设备消失或读错误时返回
pub fn serve(path: &str, baud: u32, dispatcher: &Dispatcher) -> io::Result<()> {
    let mut port = open_port(path, baud)?;
    info!("serial transport up on '{path}' at {baud} baud");

    let mut decoder = FrameDecoder::request();
    let mut buf = [0u8; 256];
    loop {
        let n = port.read(&mut buf)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "serial device closed",
            ));
        }
        for payload in decoder.push_slice(&buf[..n]) {
            let Ok(request) = String::from_utf8(payload) else {
                warn!("non UTF-8 frame payload, dropping");
                continue;
            };
            let reply = dispatcher.dispatch(&request);
            // 只有 poll 回帧，其余命令的应答丢弃
            if request.contains("poll") {
                match encode_response(reply.as_bytes()) {
                    Ok(frame) => port.write_all(&frame)?,
                    Err(e) => warn!("reply does not fit a response frame: {e}"),
                }
            }
        }
    }
}

fn open_port(path: &str, baud: u32) -> io::Result<File> {
    let speed = match baud {
        115200 => libc::B115200,
        57600 => libc::B57600,
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported baud rate: {other}"),
            ));
        },
    };

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY)
        .open(path)?;
    let fd = file.as_raw_fd();

    // 裸模式 8N1，无流控；read 至少等到 1 字节
    unsafe {
        let mut tio: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut tio) != 0 {
            return Err(io::Error::last_os_error());
        }
        libc::cfmakeraw(&mut tio);
        tio.c_cflag &= !(libc::CSTOPB | libc::CRTSCTS | libc::PARENB);
        tio.c_cflag |= libc::CLOCAL | libc::CREAD | libc::CS8;
        tio.c_cc[libc::VMIN] = 1;
        tio.c_cc[libc::VTIME] = 0;
        if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(file)
}
