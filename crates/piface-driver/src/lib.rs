//! # PiFace 驱动层
//!
//! 本模块提供 PiFace Digital 2 扩展板的设备驱动功能，包括：
//! - 扩展芯片的寄存器级 GPIO 读写与初始化序列
//! - 软件 PWM 电机调度（1 ms 周期回调）
//! - 超声测距状态机（500 ms 周期触发）
//! - 输入变化监视与状态事件队列
//!
//! 所有总线事务通过一把总线锁串行化；输出锁存只在内存
//! 读-改-写这一步持有自己的锁，总线写发生在锁外。

mod error;
pub mod expander;
pub mod motor;
mod piface;
pub mod pipeline;
pub mod sonar;

pub use error::DriverError;
pub use expander::{Expander, IoChangeEvent};
pub use motor::{DutyCycle, MotorBank, MotorState, MOTOR_POWER_BIT};
pub use piface::Piface;
pub use pipeline::StatusEvent;
pub use sonar::RangeSensor;
