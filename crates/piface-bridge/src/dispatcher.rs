//! 命令分发器
//!
//! 命令表和各条回复的字面内容是积木端扩展描述文件约定死的，
//! 一个字节都不能差。

use piface_driver::motor::MOTOR_COUNT;
use piface_driver::{DriverError, MotorState, Piface};
use piface_protocol::Request;
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

const REPLY_OKAY: &str = "okay\n";
const REPLY_NOT_CONNECTED: &str = "_problem The Digital 2 Piface is not connected.\n";
// 历史原因：这一条没有换行
const REPLY_INVALID_BIT: &str = "_problem invalid bit";
const REPLY_INVALID_MOTOR: &str = "_problem: invalid motor id\n";

/// 分发过程中的内部失败；全部在边界处折叠成未知命令回复
#[derive(Error, Debug)]
enum DispatchError {
    #[error("missing argument")]
    MissingArgument,
    #[error("malformed integer: {0}")]
    Int(#[from] std::num::ParseIntError),
    #[error("malformed boolean: {0}")]
    Bool(#[from] std::str::ParseBoolError),
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// 命令分发器
///
/// # 示例
///
/// ```no_run
/// use piface_bridge::Dispatcher;
/// use piface_driver::Piface;
/// use std::sync::Arc;
///
/// # fn with(piface: Arc<Piface>) {
/// let dispatcher = Dispatcher::new(piface, 50210);
/// let reply = dispatcher.dispatch("/poll");
/// # let _ = reply;
/// # }
/// ```
pub struct Dispatcher {
    piface: Arc<Piface>,
    /// 监听端口号，只用于 crossdomain.xml 的应答
    port: u16,
}

impl Dispatcher {
    pub fn new(piface: Arc<Piface>, port: u16) -> Self {
        Self { piface, port }
    }

    /// 处理一条请求，永远返回文本
    pub fn dispatch(&self, request: &str) -> String {
        match self.try_dispatch(request) {
            Ok(reply) => reply,
            Err(e) => {
                debug!("dispatch failed for {request:?}: {e}");
                unknown_command(request)
            },
        }
    }

    fn try_dispatch(&self, request: &str) -> Result<String, DispatchError> {
        let parsed = Request::parse(request);
        match parsed.command {
            // 积木端大约每秒调 30 次
            "poll" => Ok(self.poll()),
            "o" => self.set_output(&parsed.args),
            "reset_all" => {
                self.piface.motors().reset_all(self.piface.expander());
                Ok(REPLY_OKAY.to_string())
            },
            "crossdomain.xml" => Ok(format!(
                "<cross-domain-policy><allow-access-from domain=\"*\" to-ports=\"{}\"/></cross-domain-policy>\n",
                self.port
            )),
            "md" => self.set_motor_direction(&parsed.args),
            "mp" => self.set_motor_power(&parsed.args),
            _ => Ok(unknown_command(request)),
        }
    }

    /// 输入、输出和距离的多行状态应答
    fn poll(&self) -> String {
        let expander = self.piface.expander();
        if !expander.is_ready() {
            return REPLY_NOT_CONNECTED.to_string();
        }
        let inputs = expander.read_inputs();
        let outputs = expander.read_output_latch();

        let mut reply = String::new();
        for index in 0..7u8 {
            let mask = 1u8 << index;
            let _ = writeln!(reply, "i/{} {}", index, bool_word(inputs & mask != 0));
            // 锁存位 1 和 2 是命令可控的输出，穿插上报
            if index == 1 || index == 2 {
                let _ = writeln!(reply, "o/{} {}", index - 1, bool_word(outputs & mask != 0));
            }
        }
        let _ = writeln!(reply, "d {}", self.piface.sensor().last_distance_mm());
        reply
    }

    /// 设置一个输出位；对外编号 0/1，锁存里整体偏移 1（位 0 是继电器）
    fn set_output(&self, args: &[&str]) -> Result<String, DispatchError> {
        let first = args.first().ok_or(DispatchError::MissingArgument)?;
        if args.len() == 2 {
            let bit = first.parse::<i32>()? + 1;
            if (1..=2).contains(&bit) {
                let state: bool = args[1].parse()?;
                let mask = 1u8 << bit;
                let expander = self.piface.expander();
                if state {
                    expander.set_bit_state(mask, 0);
                } else {
                    expander.set_bit_state(0, mask);
                }
                return Ok(REPLY_OKAY.to_string());
            }
        }
        Ok(REPLY_INVALID_BIT.to_string())
    }

    fn set_motor_direction(&self, args: &[&str]) -> Result<String, DispatchError> {
        let id_arg = args.first().ok_or(DispatchError::MissingArgument)?;
        let Ok(id) = id_arg.parse::<usize>() else {
            return Ok(REPLY_INVALID_MOTOR.to_string());
        };
        if id >= MOTOR_COUNT {
            return Ok(REPLY_INVALID_MOTOR.to_string());
        }
        let name = args.get(1).ok_or(DispatchError::MissingArgument)?;
        self.piface.motors().set_direction(id, MotorState::from_name(name))?;
        Ok(REPLY_OKAY.to_string())
    }

    fn set_motor_power(&self, args: &[&str]) -> Result<String, DispatchError> {
        let id_arg = args.first().ok_or(DispatchError::MissingArgument)?;
        let Ok(id) = id_arg.parse::<usize>() else {
            return Ok(REPLY_INVALID_MOTOR.to_string());
        };
        let power_arg = args.get(1).ok_or(DispatchError::MissingArgument)?;
        let Ok(power) = power_arg.parse::<i32>() else {
            return Ok(REPLY_INVALID_MOTOR.to_string());
        };
        if self.piface.motors().set_power(id, power).is_err() {
            return Ok(REPLY_INVALID_MOTOR.to_string());
        }
        Ok(REPLY_OKAY.to_string())
    }
}

fn bool_word(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

fn unknown_command(request: &str) -> String {
    format!("_problem unknown command: {request}\n")
}
