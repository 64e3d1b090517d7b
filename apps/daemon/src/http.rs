//! TCP 监听与 HTTP 风格封装
//!
//! 一个端口同时服务两种客户端：
//!
//! - HTTP 风格：请求行 `GET /<command>/<args> HTTP/1.1`，取 `GET` 后
//!   第一个空格分隔的片段交给分发器，应答裹上最小化的 200 响应头
//!   （带 `Access-Control-Allow-Origin: *`，积木端是浏览器插件）
//! - 裸 TCP：第一行不是 GET 的，整行当命令，应答原样回写不封装
//!
//! 每个连接一问一答，应答完即关闭。

use piface_bridge::Dispatcher;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

const BUFFER_SIZE: usize = 8192;
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// 接受循环；每个连接一个线程
pub fn serve(listener: TcpListener, dispatcher: Arc<Dispatcher>) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let dispatcher = dispatcher.clone();
                thread::spawn(move || {
                    if let Err(e) = handle_connection(stream, &dispatcher) {
                        debug!("connection error: {e}");
                    }
                });
            },
            Err(e) => warn!("accept failed: {e}"),
        }
    }
}

fn handle_connection(mut stream: TcpStream, dispatcher: &Dispatcher) -> std::io::Result<()> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut buf = [0u8; BUFFER_SIZE];
    let n = stream.read(&mut buf)?;
    let text = String::from_utf8_lossy(&buf[..n]);
    let first_line = text.lines().next().unwrap_or("");

    let mut parts = first_line.split(' ');
    let response = match parts.next() {
        Some("GET") => {
            let reply = match parts.next() {
                Some(target) => {
                    debug!("request: {target}");
                    dispatcher.dispatch(target)
                },
                None => "_problem unknown error\n".to_string(),
            };
            render_http_ok(&reply)
        },
        Some("") | None => render_http_error(),
        // 裸 TCP 命令行
        _ => dispatcher.dispatch(first_line),
    };
    stream.write_all(response.as_bytes())
}

fn render_http_ok(reply: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/html; charset=ISO-8859-1\r\n\
         Content-Length: {}\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Connection: close\r\n\r\n{}",
        reply.len(),
        reply
    )
}

fn render_http_error() -> String {
    "HTTP/1.1 500 Internal Server Error\r\n\
     Content-Type: text/html; charset=ISO-8859-1\r\n\
     Content-Length: 0\r\n\
     Connection: close\r\n\r\n"
        .to_string()
}
