//! # PiFace 总线适配层
//!
//! SPI 硬件抽象层，提供统一的总线事务接口。
//!
//! 扩展芯片的每笔事务都是 2–3 字节的定长交换：写是一次 3 字节的
//! 半双工写（器件操作码、寄存器地址、数据），读是 2 字节命令后紧跟
//! 1 字节回读，期间片选保持有效。这一层只搬运字节，操作码和寄存器
//! 语义属于驱动层。

use thiserror::Error;

#[cfg(target_os = "linux")]
pub mod spidev;

#[cfg(target_os = "linux")]
pub use spidev::SpidevBus;

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockExpanderChip, MockHandle};

/// 总线适配层统一错误类型
#[derive(Error, Debug)]
pub enum BusError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] BusDeviceError),
    #[error("Bus not started")]
    NotStarted,
}

/// 设备/后端错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusDeviceErrorKind {
    Unknown,
    NotFound,
    NoDevice,
    AccessDenied,
    UnsupportedConfig,
    InvalidTransaction,
    Backend,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct BusDeviceError {
    pub kind: BusDeviceErrorKind,
    pub message: String,
}

impl BusDeviceError {
    pub fn new(kind: BusDeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<String> for BusDeviceError {
    fn from(message: String) -> Self {
        Self::new(BusDeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for BusDeviceError {
    fn from(message: &str) -> Self {
        Self::new(BusDeviceErrorKind::Unknown, message)
    }
}

/// SPI 总线事务接口
///
/// 驱动层通过这个 trait 跟物理总线解耦，测试时注入
/// [`mock::MockExpanderChip`]。
pub trait SpiTransport {
    /// 一次半双工写事务（片选全程有效）
    fn write(&mut self, buf: &[u8]) -> Result<(), BusError>;

    /// 先写 `tx` 再读满 `rx`，两段之间片选保持有效
    fn transfer_sequential(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), BusError>;
}

/// 永远不可用的总线
///
/// 硬件缺失时的占位实现：所有事务返回 [`BusError::NotStarted`]，
/// 驱动层初始化随之失败并进入永久不可用状态，协议上仍能答出
/// `_problem` 行。
#[derive(Debug, Default)]
pub struct NullBus;

impl SpiTransport for NullBus {
    fn write(&mut self, _buf: &[u8]) -> Result<(), BusError> {
        Err(BusError::NotStarted)
    }

    fn transfer_sequential(&mut self, _tx: &[u8], _rx: &mut [u8]) -> Result<(), BusError> {
        Err(BusError::NotStarted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_bus_always_fails() {
        let mut bus = NullBus;
        assert!(matches!(bus.write(&[0x40, 0x00, 0x00]), Err(BusError::NotStarted)));
        let mut rx = [0u8; 1];
        assert!(matches!(
            bus.transfer_sequential(&[0x41, 0x13], &mut rx),
            Err(BusError::NotStarted)
        ));
    }

    #[test]
    fn test_device_error_display() {
        let err = BusDeviceError::new(BusDeviceErrorKind::NotFound, "no such device");
        let msg = format!("{}", BusError::Device(err));
        assert!(msg.contains("NotFound") && msg.contains("no such device"));
    }
}
