//! MCP23S17 扩展芯片驱动
//!
//! PiFace Digital 2 上的 16 位 GPIO 扩展芯片，SPI 接口。端口 A 配成
//! 全输出（继电器、电机驱动、声呐触发），端口 B 配成全输入带上拉
//! （按键、开关、声呐回波）。复位脚在板上接 3.3V，IOCON.BANK 保持 0。
//!
//! 芯片自己的电平变化中断保持关闭（GPINTEN=0），系统用 ≥50 ms 的
//! 去抖轮询代替中断内容，见 [`crate::pipeline::watch_loop`]。

use crate::error::DriverError;
use parking_lot::Mutex;
use piface_bus::{BusError, SpiTransport};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

// 寄存器地址（BANK=0 编址）
pub const IODIRA: u8 = 0x00;
pub const IODIRB: u8 = 0x01;
pub const GPINTENB: u8 = 0x05;
pub const DEFVALB: u8 = 0x07;
pub const IOCONA: u8 = 0x0A;
pub const INTCONB: u8 = 0x0B;
pub const GPPUA: u8 = 0x0C;
pub const GPPUB: u8 = 0x0D;
/// 中断标志寄存器（芯片中断关闭时不会置位，保留作为芯片接口文档）
pub const INTFB: u8 = 0x0F;
/// 中断时刻的端口快照寄存器（同上）
pub const INTCAPB: u8 = 0x11;
pub const GPIOA: u8 = 0x12;
pub const GPIOB: u8 = 0x13;
pub const OLATA: u8 = 0x14;
pub const OLATB: u8 = 0x15;

/// 器件操作码：0100 A2A1A0 R/W
const OPCODE_BASE: u8 = 0x40;
const OPCODE_READ: u8 = 0x01;
const OPCODE_WRITE: u8 = 0x00;

/// 输入端口的一次电平变化
///
/// `changed_mask` 是发生跳变的位，`captured_state` 是变化时刻的
/// 端口快照。初始化完成后会发出一条 `changed_mask == 0` 的就绪事件。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoChangeEvent {
    pub changed_mask: u8,
    pub captured_state: u8,
}

/// 扩展芯片驱动
///
/// 输出锁存影子 `olat` 是唯一需要同步的共享状态：所有改写都在锁内
/// 做读-改-写，随后的总线写在锁外进行。所有总线事务（读和写）额外
/// 经过一把总线锁串行化，PWM 回调、声呐回调和命令写入可以并发。
///
/// 初始化失败后进入**永久不可用**状态：`is_ready()` 恒为 false，
/// 所有寄存器操作退化为返回 0 的空操作，不再重试。
pub struct Expander {
    bus: Mutex<Box<dyn SpiTransport + Send>>,
    /// 输出锁存影子（OutputState）
    olat: Mutex<u8>,
    available: AtomicBool,
    hw_addr: u8,
}

impl Expander {
    /// 包装一个总线适配器；硬件在 [`initialize`](Self::initialize) 之前视为不可用
    pub fn new(bus: impl SpiTransport + Send + 'static) -> Self {
        Self {
            bus: Mutex::new(Box::new(bus)),
            olat: Mutex::new(0),
            available: AtomicBool::new(false),
            hw_addr: 0,
        }
    }

    /// 执行固定的配置序列
    ///
    /// IOCON 打开 HAEN（硬件地址使能），端口 A 全输出驱到低电平，
    /// 端口 B 全输入带上拉，芯片的电平变化中断全部关闭，最后做一次
    /// 测试回读。任何一步失败都让驱动进入永久不可用状态并返回错误。
    pub fn initialize(&self) -> Result<(), DriverError> {
        match self.init_sequence() {
            Ok(()) => {
                self.available.store(true, Ordering::Release);
                debug!("expander configured and ready");
                Ok(())
            },
            Err(e) => {
                self.available.store(false, Ordering::Release);
                Err(DriverError::Bus(e))
            },
        }
    }

    fn init_sequence(&self) -> Result<(), BusError> {
        self.write_register(IOCONA, 0x28)?; // BANK=0, SEQOP=1, HAEN=1
        self.write_register(IODIRA, 0x00)?; // 端口 A 全输出
        self.write_register(IODIRB, 0xFF)?; // 端口 B 全输入
        self.write_register(GPPUB, 0xFF)?; // 输入上拉
        self.write_register(DEFVALB, 0x00)?; // 只在 INTCONB=0xFF 时才有意义
        self.write_register(INTCONB, 0x00)?; // 引脚变化即中断（未启用）
        self.write_register(GPINTENB, 0x00)?; // 关闭全部芯片中断
        self.write_register(GPIOA, 0x00)?; // 输出全部驱到低
        *self.olat.lock() = 0;
        // 测试回读
        self.read_register(OLATA)?;
        Ok(())
    }

    /// 硬件是否可用（初始化失败后恒为 false）
    pub fn is_ready(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    fn opcode(&self, rw: u8) -> u8 {
        OPCODE_BASE | ((self.hw_addr << 1) & 0x0E) | rw
    }

    fn write_register(&self, reg: u8, value: u8) -> Result<(), BusError> {
        let buf = [self.opcode(OPCODE_WRITE), reg, value];
        self.bus.lock().write(&buf)
    }

    fn read_register(&self, reg: u8) -> Result<u8, BusError> {
        let tx = [self.opcode(OPCODE_READ), reg];
        let mut rx = [0u8; 1];
        self.bus.lock().transfer_sequential(&tx, &mut rx)?;
        Ok(rx[0])
    }

    /// 不可用或出错时一律返回 0；调用方把 0 当作"硬件不在"，不重试
    fn read_or_zero(&self, reg: u8) -> u8 {
        if !self.is_ready() {
            return 0;
        }
        match self.read_register(reg) {
            Ok(value) => value,
            Err(e) => {
                warn!("register 0x{reg:02X} read failed: {e}");
                0
            },
        }
    }

    /// 读输入端口快照（每次都走总线，不缓存）
    pub fn read_inputs(&self) -> u8 {
        self.read_or_zero(GPIOB)
    }

    /// 回读输出锁存
    pub fn read_output_latch(&self) -> u8 {
        self.read_or_zero(OLATA)
    }

    fn write_gpioa(&self, value: u8) {
        if let Err(e) = self.write_register(GPIOA, value) {
            warn!("output write failed: {e}");
        }
    }

    /// 整字节设置输出端口；值没变时跳过总线写
    pub fn write_outputs(&self, mask: u8) {
        if !self.is_ready() {
            return;
        }
        let changed = {
            let mut olat = self.olat.lock();
            if *olat == mask {
                false
            } else {
                *olat = mask;
                true
            }
        };
        if changed {
            self.write_gpioa(mask);
        }
    }

    /// 安全的置位/清零过渡
    ///
    /// 先清 `clear_mask` 中当前为 1 的位（有变化才写总线），再置
    /// `set_mask` 中当前为 0 的位（同样有变化才写）。先清后置的顺序
    /// 是强制的：电机的正转位和反转位不允许同时有效，哪怕一瞬间。
    pub fn set_bit_state(&self, set_mask: u8, clear_mask: u8) {
        if !self.is_ready() {
            return;
        }
        let cleared = {
            let mut olat = self.olat.lock();
            if *olat & clear_mask != 0 {
                *olat &= !clear_mask;
                Some(*olat)
            } else {
                None
            }
        };
        if let Some(value) = cleared {
            self.write_gpioa(value);
        }
        let set = {
            let mut olat = self.olat.lock();
            if *olat & set_mask != set_mask {
                *olat |= set_mask;
                Some(*olat)
            } else {
                None
            }
        };
        if let Some(value) = set {
            self.write_gpioa(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use piface_bus::{MockExpanderChip, NullBus};

    fn ready_expander() -> (Expander, piface_bus::MockHandle) {
        let chip = MockExpanderChip::new();
        let handle = chip.handle();
        let expander = Expander::new(chip);
        expander.initialize().unwrap();
        (expander, handle)
    }

    #[test]
    fn test_init_sequence_order() {
        let (_expander, handle) = ready_expander();
        assert_eq!(
            handle.writes(),
            vec![
                (IOCONA, 0x28),
                (IODIRA, 0x00),
                (IODIRB, 0xFF),
                (GPPUB, 0xFF),
                (DEFVALB, 0x00),
                (INTCONB, 0x00),
                (GPINTENB, 0x00),
                (GPIOA, 0x00),
            ]
        );
    }

    #[test]
    fn test_init_failure_is_permanent() {
        let expander = Expander::new(NullBus);
        assert!(expander.initialize().is_err());
        assert!(!expander.is_ready());
        // 之后所有操作退化为返回 0 的空操作
        assert_eq!(expander.read_inputs(), 0);
        assert_eq!(expander.read_output_latch(), 0);
        expander.write_outputs(0xFF);
        expander.set_bit_state(0x08, 0x20);
        assert!(!expander.is_ready());
    }

    #[test]
    fn test_read_inputs_uncached() {
        let (expander, handle) = ready_expander();
        handle.set_inputs(0x55);
        assert_eq!(expander.read_inputs(), 0x55);
        handle.set_inputs(0xAA);
        assert_eq!(expander.read_inputs(), 0xAA);
    }

    #[test]
    fn test_set_bit_state_clear_before_set() {
        let (expander, handle) = ready_expander();
        expander.set_bit_state(0x20, 0);
        handle.clear_writes();

        expander.set_bit_state(0x08, 0x20);
        // 必须先观察到 0x20 被清掉，再观察到 0x08 被置上
        assert_eq!(handle.writes(), vec![(GPIOA, 0x00), (GPIOA, 0x08)]);
        assert_eq!(handle.output_latch(), 0x08);
    }

    #[test]
    fn test_idempotent_writes_skipped() {
        let (expander, handle) = ready_expander();
        expander.set_bit_state(0x08, 0x20);
        handle.clear_writes();

        // 状态没变，不应有任何总线写
        expander.set_bit_state(0x08, 0x20);
        expander.write_outputs(0x08);
        assert!(handle.writes().is_empty());
    }

    #[test]
    fn test_write_outputs_updates_latch() {
        let (expander, handle) = ready_expander();
        expander.write_outputs(0x81);
        assert_eq!(handle.output_latch(), 0x81);
        assert_eq!(expander.read_output_latch(), 0x81);
    }
}
