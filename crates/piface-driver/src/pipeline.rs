//! 周期回调循环
//!
//! 三个相互独立的工作线程，硬件就绪后由 [`crate::Piface`] 启动：
//!
//! - `pwm_loop`：1 ms 一拍推进电机 PWM 时钟
//! - `sonar_loop`：500 ms 触发一次超声测量
//! - `watch_loop`：50 ms 轮询输入端口，把电平变化放进状态队列
//!
//! 循环之间没有顺序保证，唯一的互斥是输出锁存锁和总线锁。

use crate::expander::{Expander, IoChangeEvent};
use crate::motor::MotorBank;
use crate::sonar::RangeSensor;
use crossbeam_channel::Sender;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::trace;

/// PWM 拍周期（名义 1 ms）
pub const PWM_TICK: Duration = Duration::from_millis(1);
/// 声呐测量周期
pub const SONAR_PERIOD: Duration = Duration::from_millis(500);
/// 输入轮询周期，同时就是变化事件的去抖下限
pub const WATCH_PERIOD: Duration = Duration::from_millis(50);

/// 发往状态队列的事件
///
/// 队列有界（见 [`crate::Piface`]），写满时丢弃新事件；单消费者，
/// 每个观察到的沿恰好投递一次。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// 输入端口电平变化（初始化完成后先发一条 `changed_mask == 0`
    /// 的就绪快照）
    InputChange(IoChangeEvent),
    /// 新接受的声呐距离（毫米）
    Distance(u32),
}

/// PWM 主循环
///
/// 用 spin_sleep 保持 1 ms 拍点；落后时直接对齐到当前时刻，不追帧。
/// 时钟是单调递增的拍计数，各通道按自己的周期取模得到相位。
pub fn pwm_loop(expander: Arc<Expander>, motors: Arc<MotorBank>, running: Arc<AtomicBool>) {
    let sleeper = spin_sleep::SpinSleeper::default();
    let mut clock: u64 = 0;
    let mut next = Instant::now() + PWM_TICK;
    while running.load(Ordering::Acquire) {
        motors.tick(&expander, clock);
        clock = clock.wrapping_add(1);

        let now = Instant::now();
        if next > now {
            sleeper.sleep(next - now);
        } else {
            next = now;
        }
        next += PWM_TICK;
    }
    trace!("pwm loop exiting");
}

/// 声呐主循环
///
/// 每 500 ms 触发一次测量；接受的样本进状态队列。测量本身最长阻塞
/// 60 ms（回波等待），不会和下一个周期重叠。
pub fn sonar_loop(
    expander: Arc<Expander>,
    sensor: Arc<RangeSensor>,
    status_tx: Sender<StatusEvent>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Acquire) {
        if let Some(distance) = sensor.measure(&expander)
            && status_tx.try_send(StatusEvent::Distance(distance)).is_err()
        {
            trace!("status queue full, dropping distance sample");
        }
        // 分片睡眠，放下运行标志后最多迟滞一个分片
        let mut slept = Duration::ZERO;
        while slept < SONAR_PERIOD && running.load(Ordering::Acquire) {
            thread::sleep(WATCH_PERIOD);
            slept += WATCH_PERIOD;
        }
    }
    trace!("sonar loop exiting");
}

/// 输入监视循环
///
/// 芯片自己的电平变化中断保持关闭，这里用 50 ms 去抖轮询代替：
/// 相邻两次快照的异或就是 `changed_mask`，当前快照就是
/// `captured_state`。
pub fn watch_loop(
    expander: Arc<Expander>,
    status_tx: Sender<StatusEvent>,
    running: Arc<AtomicBool>,
) {
    let mut previous = expander.read_inputs();
    // 硬件就绪快照
    let _ = status_tx.try_send(StatusEvent::InputChange(IoChangeEvent {
        changed_mask: 0,
        captured_state: previous,
    }));

    while running.load(Ordering::Acquire) {
        thread::sleep(WATCH_PERIOD);
        let current = expander.read_inputs();
        if current != previous {
            let event = IoChangeEvent {
                changed_mask: previous ^ current,
                captured_state: current,
            };
            trace!(
                "input change: mask {:08b}, state {:08b}",
                event.changed_mask, event.captured_state
            );
            if status_tx.try_send(StatusEvent::InputChange(event)).is_err() {
                trace!("status queue full, dropping input change event");
            }
            previous = current;
        }
    }
    trace!("watch loop exiting");
}
