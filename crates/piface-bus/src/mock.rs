//! 寄存器级芯片仿真
//!
//! `MockExpanderChip` 在事务层面仿真 MCP23S17：解析器件操作码和
//! 寄存器地址，维护寄存器文件和输出锁存，记录全部写入。驱动层和
//! 分发层的测试用它代替真实总线，不需要任何硬件。
//!
//! 仿真范围刻意很小：只覆盖本系统用到的寄存器语义（GPIO 写入同步到
//! 输出锁存、输入端口由测试侧注入），不仿真中断引脚。

use crate::{BusDeviceError, BusDeviceErrorKind, BusError, SpiTransport};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

// 仿真用到的寄存器地址，与驱动层的常量表一致（BANK=0 编址）
const REG_GPIOA: u8 = 0x12;
const REG_GPIOB: u8 = 0x13;
const REG_OLATA: u8 = 0x14;
/// 寄存器文件大小（BANK=0 下最后一个寄存器是 OLATB 0x15）
const REG_FILE_SIZE: usize = 0x16;

struct MockState {
    regs: Mutex<[u8; REG_FILE_SIZE]>,
    writes: Mutex<Vec<(u8, u8)>>,
    /// 输入端口电平，由测试侧注入；默认 0xFF（上拉、开关未按下）
    inputs: AtomicU8,
    fail: AtomicBool,
}

/// 仿真芯片（实现 [`SpiTransport`]，移交给驱动层）
pub struct MockExpanderChip {
    state: Arc<MockState>,
}

/// 测试侧控制句柄
///
/// 在芯片移交给驱动层之后，测试通过它注入输入电平、读取输出锁存、
/// 检查写入序列或注入总线故障。
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<MockState>,
}

impl MockExpanderChip {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState {
                regs: Mutex::new([0u8; REG_FILE_SIZE]),
                writes: Mutex::new(Vec::new()),
                inputs: AtomicU8::new(0xFF),
                fail: AtomicBool::new(false),
            }),
        }
    }

    /// 获取控制句柄（可在移交芯片前后任意克隆）
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: self.state.clone(),
        }
    }
}

impl Default for MockExpanderChip {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHandle {
    /// 注入输入端口电平
    pub fn set_inputs(&self, value: u8) {
        self.state.inputs.store(value, Ordering::SeqCst);
    }

    pub fn inputs(&self) -> u8 {
        self.state.inputs.load(Ordering::SeqCst)
    }

    /// 当前输出锁存值
    pub fn output_latch(&self) -> u8 {
        self.state.regs.lock()[REG_OLATA as usize]
    }

    /// 任意寄存器的当前值
    pub fn register(&self, reg: u8) -> u8 {
        self.state.regs.lock()[reg as usize]
    }

    /// 到目前为止的 (寄存器, 数据) 写入序列
    pub fn writes(&self) -> Vec<(u8, u8)> {
        self.state.writes.lock().clone()
    }

    pub fn clear_writes(&self) {
        self.state.writes.lock().clear();
    }

    /// 注入总线故障：之后所有事务返回设备错误
    pub fn set_fail(&self, fail: bool) {
        self.state.fail.store(fail, Ordering::SeqCst);
    }
}

fn mock_failure() -> BusError {
    BusError::Device(BusDeviceError::new(
        BusDeviceErrorKind::NoDevice,
        "mock bus failure injected",
    ))
}

fn invalid(message: impl Into<String>) -> BusError {
    BusError::Device(BusDeviceError::new(
        BusDeviceErrorKind::InvalidTransaction,
        message,
    ))
}

impl SpiTransport for MockExpanderChip {
    fn write(&mut self, buf: &[u8]) -> Result<(), BusError> {
        if self.state.fail.load(Ordering::SeqCst) {
            return Err(mock_failure());
        }
        let [opcode, reg, value] = buf else {
            return Err(invalid(format!("write transaction must be 3 bytes, got {}", buf.len())));
        };
        // 操作码：0100 AAA0（写方向位为 0），硬件地址位不校验
        if opcode & 0xF1 != 0x40 {
            return Err(invalid(format!("bad write opcode 0x{opcode:02X}")));
        }
        if *reg as usize >= REG_FILE_SIZE {
            return Err(invalid(format!("register 0x{reg:02X} out of range")));
        }
        let mut regs = self.state.regs.lock();
        regs[*reg as usize] = *value;
        // GPIO 写入落到输出锁存（真实芯片的行为）
        if *reg == REG_GPIOA {
            regs[REG_OLATA as usize] = *value;
        } else if *reg == REG_OLATA {
            regs[REG_GPIOA as usize] = *value;
        }
        drop(regs);
        self.state.writes.lock().push((*reg, *value));
        Ok(())
    }

    fn transfer_sequential(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), BusError> {
        if self.state.fail.load(Ordering::SeqCst) {
            return Err(mock_failure());
        }
        let [opcode, reg] = tx else {
            return Err(invalid(format!("read command must be 2 bytes, got {}", tx.len())));
        };
        if opcode & 0xF1 != 0x41 {
            return Err(invalid(format!("bad read opcode 0x{opcode:02X}")));
        }
        if rx.len() != 1 {
            return Err(invalid(format!("read expects 1 data byte, got {}", rx.len())));
        }
        if *reg as usize >= REG_FILE_SIZE {
            return Err(invalid(format!("register 0x{reg:02X} out of range")));
        }
        rx[0] = if *reg == REG_GPIOB {
            self.state.inputs.load(Ordering::SeqCst)
        } else {
            self.state.regs.lock()[*reg as usize]
        };
        Ok(())
    }
}
