//! 软件 PWM 电机调度
//!
//! 两路直流电机经 L298N 驱动板接在端口 A 上，每路占一对正转/反转位。
//! 功率分 7 档（0–6），映射到固定的 (导通拍, 关断拍) 占空表；外部的
//! 1 ms 周期回调推进相位，把每一拍的目标状态写到扩展芯片上。
//!
//! 表是为了最大化脉冲频率挑的：周期最短 2 拍（档位 3），最长 5 拍。

use crate::error::DriverError;
use crate::expander::Expander;
use parking_lot::Mutex;

/// 电机路数
pub const MOTOR_COUNT: usize = 2;

/// 每路电机的正转位（端口 A）
pub const MOTOR_BIT_FORWARD: [u8; MOTOR_COUNT] = [0x08, 0x10];
/// 每路电机的反转位（端口 A）
pub const MOTOR_BIT_BACK: [u8; MOTOR_COUNT] = [0x20, 0x40];

/// 给电机驱动板供电的继电器位；所有初始化完成后才上电
pub const MOTOR_POWER_BIT: u8 = 0x01;

/// 电机逻辑方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotorState {
    #[default]
    Stopped,
    Forward,
    Reverse,
}

impl MotorState {
    /// 按名字解析；不认识的名字回落到 Stopped
    pub fn from_name(name: &str) -> Self {
        match name {
            "Forward" => MotorState::Forward,
            "Reverse" => MotorState::Reverse,
            _ => MotorState::Stopped,
        }
    }
}

/// 一对占空拍数：`period = on_ticks + off_ticks`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DutyCycle {
    pub on_ticks: u32,
    pub off_ticks: u32,
}

impl DutyCycle {
    /// 功率档位映射表；任何输入先钳到 0..=6
    ///
    /// 档位 6 是全导通（周期内从不关断），档位 0 是全关断。
    pub fn from_power(power: i32) -> Self {
        let (on_ticks, off_ticks) = match power.clamp(0, 6) {
            0 => (0, 5),
            1 => (1, 3),
            2 => (1, 2),
            3 => (1, 1),
            4 => (2, 1),
            5 => (3, 1),
            _ => (5, 0),
        };
        Self {
            on_ticks,
            off_ticks,
        }
    }

    pub fn period(&self) -> u32 {
        self.on_ticks + self.off_ticks
    }

    /// 周期内的导通占比
    pub fn on_fraction(&self) -> f64 {
        f64::from(self.on_ticks) / f64::from(self.period())
    }
}

#[derive(Debug, Clone, Copy)]
struct MotorChannel {
    state: MotorState,
    duty: DutyCycle,
}

/// 两路电机的共享状态
///
/// 逻辑方向和占空对由命令线程改写，PWM 回调每拍读取快照。物理驱动
/// 全部走 [`Expander::set_bit_state`]，保证一路电机的正反转位永远
/// 不会同时有效。
pub struct MotorBank {
    channels: Mutex<[MotorChannel; MOTOR_COUNT]>,
}

impl MotorBank {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(
                [MotorChannel {
                    state: MotorState::Stopped,
                    duty: DutyCycle::from_power(0),
                }; MOTOR_COUNT],
            ),
        }
    }

    fn check_id(id: usize) -> Result<(), DriverError> {
        if id < MOTOR_COUNT {
            Ok(())
        } else {
            Err(DriverError::InvalidMotorId(id))
        }
    }

    /// 设置逻辑方向（物理位由下一拍 PWM 回调落实）
    pub fn set_direction(&self, id: usize, state: MotorState) -> Result<(), DriverError> {
        Self::check_id(id)?;
        self.channels.lock()[id].state = state;
        Ok(())
    }

    /// 设置功率档位（任意整数，内部钳到 0..=6）
    pub fn set_power(&self, id: usize, power: i32) -> Result<(), DriverError> {
        Self::check_id(id)?;
        self.channels.lock()[id].duty = DutyCycle::from_power(power);
        Ok(())
    }

    pub fn direction(&self, id: usize) -> Result<MotorState, DriverError> {
        Self::check_id(id)?;
        Ok(self.channels.lock()[id].state)
    }

    pub fn duty(&self, id: usize) -> Result<DutyCycle, DriverError> {
        Self::check_id(id)?;
        Ok(self.channels.lock()[id].duty)
    }

    /// 停下两路电机并立即驱动输出位
    pub fn reset_all(&self, expander: &Expander) {
        {
            let mut channels = self.channels.lock();
            for channel in channels.iter_mut() {
                channel.state = MotorState::Stopped;
            }
        }
        for id in 0..MOTOR_COUNT {
            Self::drive(expander, id, MotorState::Stopped);
        }
    }

    /// 推进一拍：`phase = clock % period`，相位落在关断窗内就驱动
    /// Stopped，否则驱动逻辑方向
    pub fn tick(&self, expander: &Expander, clock: u64) {
        let snapshot = *self.channels.lock();
        for (id, channel) in snapshot.iter().enumerate() {
            // 表里的周期最短 2 拍；max(1) 兜住手搓的 (0,0) 占空对
            let phase = clock % u64::from(channel.duty.period().max(1));
            let target = if phase < u64::from(channel.duty.off_ticks) {
                MotorState::Stopped
            } else {
                channel.state
            };
            Self::drive(expander, id, target);
        }
    }

    fn drive(expander: &Expander, id: usize, state: MotorState) {
        let forward = MOTOR_BIT_FORWARD[id];
        let back = MOTOR_BIT_BACK[id];
        match state {
            MotorState::Stopped => expander.set_bit_state(0, forward | back),
            MotorState::Forward => expander.set_bit_state(forward, back),
            MotorState::Reverse => expander.set_bit_state(back, forward),
        }
    }
}

impl Default for MotorBank {
    fn default() -> Self {
        Self::new()
    }
}
