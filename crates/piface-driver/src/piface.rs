//! 设备 API 模块
//!
//! 对外的 `Piface` 结构体，封装扩展芯片、电机组、测距传感器和
//! 三个周期工作线程的生命周期。

use crate::expander::Expander;
use crate::motor::{MOTOR_POWER_BIT, MotorBank};
use crate::pipeline::{self, StatusEvent};
use crate::sonar::RangeSensor;
use crossbeam_channel::{Receiver, Sender};
use piface_bus::SpiTransport;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, spawn};
use tracing::{error, info, warn};

/// 状态事件队列容量；单消费者，写满丢新
const STATUS_QUEUE_CAPACITY: usize = 16;

/// PiFace 设备驱动（对外 API）
///
/// 构造时做总线发现和配置序列；硬件就绪后给电机驱动板的继电器
/// 上电并启动 PWM / 声呐 / 输入监视三个工作线程。初始化失败时
/// 结构体照常构造，但永远处于不可用状态、不启动任何线程——
/// 上层协议仍能对 `poll` 答出 `_problem` 行。
///
/// Drop 时放下运行标志并 join 全部工作线程。
pub struct Piface {
    expander: Arc<Expander>,
    motors: Arc<MotorBank>,
    sensor: Arc<RangeSensor>,
    status_rx: Receiver<StatusEvent>,
    /// 队列发送端押在结构体里，保证没有工作线程时接收端也不断开
    _status_tx: Sender<StatusEvent>,
    is_running: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl Piface {
    /// 创建实例并初始化硬件
    ///
    /// # 参数
    /// - `bus`: SPI 总线适配器（被驱动独占，所有事务经内部总线锁串行化）
    pub fn new(bus: impl SpiTransport + Send + 'static) -> Self {
        let expander = Arc::new(Expander::new(bus));
        if let Err(e) = expander.initialize() {
            error!("expander initialization failed, hardware permanently unavailable: {e}");
        }

        let motors = Arc::new(MotorBank::new());
        let sensor = Arc::new(RangeSensor::new());
        let (status_tx, status_rx) = crossbeam_channel::bounded(STATUS_QUEUE_CAPACITY);
        let is_running = Arc::new(AtomicBool::new(true));
        let mut workers = Vec::new();

        if expander.is_ready() {
            // 一切就绪后才给电机驱动板上电
            expander.set_bit_state(MOTOR_POWER_BIT, 0);

            let (e, m, r) = (expander.clone(), motors.clone(), is_running.clone());
            workers.push(spawn(move || pipeline::pwm_loop(e, m, r)));

            let (e, s, tx, r) = (
                expander.clone(),
                sensor.clone(),
                status_tx.clone(),
                is_running.clone(),
            );
            workers.push(spawn(move || pipeline::sonar_loop(e, s, tx, r)));

            let (e, tx, r) = (expander.clone(), status_tx.clone(), is_running.clone());
            workers.push(spawn(move || pipeline::watch_loop(e, tx, r)));

            info!("piface ready, worker loops started");
        } else {
            warn!("piface running without hardware");
        }

        Self {
            expander,
            motors,
            sensor,
            status_rx,
            _status_tx: status_tx,
            is_running,
            workers,
        }
    }

    pub fn expander(&self) -> &Arc<Expander> {
        &self.expander
    }

    pub fn motors(&self) -> &Arc<MotorBank> {
        &self.motors
    }

    pub fn sensor(&self) -> &Arc<RangeSensor> {
        &self.sensor
    }

    /// 状态事件队列的接收端（输入变化、距离样本）
    pub fn events(&self) -> &Receiver<StatusEvent> {
        &self.status_rx
    }

    pub fn is_ready(&self) -> bool {
        self.expander.is_ready()
    }

    /// 停止工作线程并等待退出；重复调用是空操作
    pub fn shutdown(&mut self) {
        self.is_running.store(false, Ordering::Release);
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked during shutdown");
            }
        }
    }
}

impl Drop for Piface {
    fn drop(&mut self) {
        self.shutdown();
    }
}
