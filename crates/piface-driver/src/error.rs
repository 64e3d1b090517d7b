//! 驱动层错误类型定义

use piface_bus::BusError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 总线事务错误
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// 电机编号超出范围（只有 0 和 1）
    #[error("invalid motor id: {0}")]
    InvalidMotorId(usize),
}
