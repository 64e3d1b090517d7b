//! 超声测距状态机
//!
//! 测距模块的触发脚接在端口 A 的最高位，回波脚接在端口 B 的最高位。
//! 一次测量：拉低触发位、短暂延时后拉高，同时起表；之后轮询回波位，
//! 在第一个下降沿（有效→无效）处按往返声速折算距离。
//!
//! 超过 1 m 的读数按环境反射噪声丢弃，上一次接受的距离保持不变；
//! 60 ms 内等不到沿就静默放弃本次测量。

use crate::expander::Expander;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// 触发位（端口 A）
pub const TRIGGER_BIT: u8 = 0x80;
/// 回波位（端口 B）
pub const ECHO_BIT: u8 = 0x80;

/// 回波等待上限
const ECHO_TIMEOUT: Duration = Duration::from_millis(60);
/// 触发脉冲前沿的保持时间
const TRIGGER_SETTLE: Duration = Duration::from_micros(10);
/// 接受的最大距离（毫米）；再远就当噪声
pub const MAX_RANGE_MM: u32 = 1000;

/// 往返时间折算距离：毫秒 × 0.170 得米，再换毫米取整
pub fn distance_from_elapsed(elapsed: Duration) -> u32 {
    let millis = elapsed.as_secs_f64() * 1000.0;
    (millis * 0.170 * 1000.0).round() as u32
}

/// 超声测距传感器
///
/// `measure` 不可重入：上一次测量还没结束时的并发调用直接变成
/// 空操作。设计上由 500 ms 周期的工作线程独占调用，见
/// [`crate::pipeline::sonar_loop`]。
pub struct RangeSensor {
    /// 最近一次接受的距离（毫米）；只有 ≤ 1 m 的测量才会覆盖它
    distance_mm: AtomicU32,
    in_flight: AtomicBool,
}

impl RangeSensor {
    pub fn new() -> Self {
        Self {
            distance_mm: AtomicU32::new(0),
            in_flight: AtomicBool::new(false),
        }
    }

    /// 最近一次接受的距离（毫米）
    pub fn last_distance_mm(&self) -> u32 {
        self.distance_mm.load(Ordering::Relaxed)
    }

    /// 执行一次测量；接受新样本时返回 `Some(毫米)`
    ///
    /// 硬件不可用、测量尚未结束、超时或读数超限时返回 `None`，
    /// 已保存的样本不受影响。
    pub fn measure(&self, expander: &Expander) -> Option<u32> {
        if !expander.is_ready() {
            return None;
        }
        if self.in_flight.swap(true, Ordering::Acquire) {
            trace!("previous measurement still outstanding, skipping");
            return None;
        }
        let result = self.measure_inner(expander);
        self.in_flight.store(false, Ordering::Release);
        result
    }

    fn measure_inner(&self, expander: &Expander) -> Option<u32> {
        // 拉低触发位复位，再拉高触发超声脉冲串并起表
        expander.set_bit_state(0, TRIGGER_BIT);
        spin_sleep::sleep(TRIGGER_SETTLE);
        expander.set_bit_state(TRIGGER_BIT, 0);
        let started = Instant::now();

        let mut previous = expander.read_inputs();
        while started.elapsed() < ECHO_TIMEOUT {
            let current = expander.read_inputs();
            if previous & ECHO_BIT != 0 && current & ECHO_BIT == 0 {
                let distance = distance_from_elapsed(started.elapsed());
                if distance <= MAX_RANGE_MM {
                    self.distance_mm.store(distance, Ordering::Relaxed);
                    debug!("range sample accepted: {distance} mm");
                    return Some(distance);
                }
                trace!("range sample discarded as noise: {distance} mm");
                return None;
            }
            previous = current;
        }
        trace!("echo timeout, no sample");
        None
    }
}

impl Default for RangeSensor {
    fn default() -> Self {
        Self::new()
    }
}
