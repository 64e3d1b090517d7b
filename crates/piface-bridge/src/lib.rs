//! # PiFace 命令分发层
//!
//! 所有传输层（HTTP 风格、裸 TCP、定长帧串口）共用的唯一入口：
//! 拿到一个命令字符串，回一个响应字符串。协议契约是"永远用文本
//! 回答"——任何解析或执行中的意外都在分发边界处折叠成
//! `_problem` 行，传输层永远看不到错误类型。
//!
//! 驱动句柄在构造时显式注入，测试用假总线隔离运行。

mod dispatcher;

pub use dispatcher::Dispatcher;
