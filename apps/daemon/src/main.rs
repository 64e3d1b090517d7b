//! PiFace 桥接守护进程主入口
//!
//! 打开 SPI 总线、构造驱动和分发器，然后拉起两个传输面：
//! TCP 监听（HTTP 风格 GET 和裸命令行共用一个端口）和可选的
//! 定长帧串口。主线程消费驱动的状态事件队列。

mod http;
#[cfg(target_os = "linux")]
mod serial;

use clap::Parser;
use piface_bridge::Dispatcher;
use piface_bus::NullBus;
use piface_driver::{Piface, StatusEvent};
use std::net::TcpListener;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

/// PiFace 桥接守护进程
///
/// 把积木式编程环境的文本命令协议接到 PiFace Digital 2 的
/// GPIO、电机 PWM 和超声测距上
#[derive(Parser, Debug)]
#[command(name = "pifaced")]
#[command(about = "PiFace bridge daemon - GPIO, motor PWM and sonar over a text protocol", long_about = None)]
struct Args {
    /// TCP 监听端口（积木端默认连 50210）
    #[arg(long, default_value = "50210")]
    port: u16,

    /// spidev 设备节点
    #[arg(long, default_value = "/dev/spidev0.0")]
    spi: String,

    /// 串口设备节点（可选，蓝牙串口桥）
    #[arg(long)]
    serial: Option<String>,

    /// 串口波特率（115200 或 57600，取决于对端设备）
    #[arg(long, default_value = "115200")]
    baud: u32,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    // 硬件缺失不致命：驱动降级到永久不可用状态，协议照常答 _problem 行
    let piface = Arc::new(open_hardware(&args.spi));

    ctrlc::set_handler(move || {
        eprintln!("\nReceived interrupt signal. Shutting down...");
        process::exit(0);
    })
    .expect("Failed to set signal handler");

    let dispatcher = Arc::new(Dispatcher::new(piface.clone(), args.port));

    let listener = match TcpListener::bind(("0.0.0.0", args.port)) {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind port {}: {e}", args.port);
            process::exit(1);
        },
    };
    info!("listening on port {}", args.port);
    {
        let dispatcher = dispatcher.clone();
        thread::spawn(move || http::serve(listener, dispatcher));
    }

    #[cfg(target_os = "linux")]
    if let Some(path) = args.serial.clone() {
        let dispatcher = dispatcher.clone();
        let baud = args.baud;
        thread::spawn(move || {
            // 串口桥不在也能跑，只是少一个传输面
            if let Err(e) = serial::serve(&path, baud, &dispatcher) {
                warn!("serial transport stopped: {e}");
            }
        });
    }
    #[cfg(not(target_os = "linux"))]
    if args.serial.is_some() {
        warn!("serial transport is only available on Linux, ignoring --serial");
    }

    // 主线程消费状态事件（输入电平变化、接受的距离样本）
    loop {
        match piface.events().recv_timeout(Duration::from_millis(200)) {
            Ok(StatusEvent::InputChange(event)) => {
                info!(
                    "input change: mask {:08b}, state {:08b}",
                    event.changed_mask, event.captured_state
                );
            },
            Ok(StatusEvent::Distance(mm)) => info!("distance: {mm} mm"),
            Err(_) => {},
        }
    }
}

fn open_hardware(spi_path: &str) -> Piface {
    #[cfg(target_os = "linux")]
    match piface_bus::SpidevBus::open(spi_path) {
        Ok(bus) => return Piface::new(bus),
        Err(e) => error!("failed to open SPI bus '{spi_path}': {e}"),
    }
    #[cfg(not(target_os = "linux"))]
    warn!("spidev backend is only available on Linux ('{spi_path}' ignored)");

    Piface::new(NullBus)
}
