//! # PiFace Protocol
//!
//! 积木式编程桥接器的文本命令协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `framing`: 串口字节流的定长帧编解码（0xAA 帧头）
//! - `command`: 斜杠分隔的命令文法解析
//!
//! ## 长度字段的不对称性
//!
//! 入站请求帧使用 1 字节长度（最长 255），出站响应帧使用 2 字节大端
//! 长度（最长 65535）。请求都很短，而 poll 的多行响应可能很长，
//! 这个不对称是协议契约的一部分，必须原样保留。

pub mod command;
pub mod framing;

// 重新导出常用类型
pub use command::Request;
pub use framing::{FrameDecoder, LengthWidth, encode_request, encode_response};

use thiserror::Error;

/// 协议层错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// 负载超出该方向长度字段的表示范围
    #[error("frame payload too long: {len} bytes (max {max})")]
    FrameTooLong { len: usize, max: usize },
}
