//! 分发器端到端测试
//!
//! 用寄存器级假芯片代替真实总线，验证命令表的逐字节应答和
//! 电机/输出位的实际效果。PWM 等工作线程照常运行，测试通过
//! 假芯片句柄观察输出锁存。

use piface_bridge::Dispatcher;
use piface_bus::{MockExpanderChip, MockHandle, NullBus};
use piface_driver::motor::{MOTOR_BIT_BACK, MOTOR_BIT_FORWARD};
use piface_driver::{DutyCycle, Piface};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn ready_dispatcher(port: u16) -> (Dispatcher, MockHandle) {
    let chip = MockExpanderChip::new();
    let handle = chip.handle();
    let piface = Arc::new(Piface::new(chip));
    assert!(piface.is_ready());
    (Dispatcher::new(piface, port), handle)
}

fn ready_dispatcher_with_piface(port: u16) -> (Dispatcher, MockHandle, Arc<Piface>) {
    let chip = MockExpanderChip::new();
    let handle = chip.handle();
    let piface = Arc::new(Piface::new(chip));
    (Dispatcher::new(piface.clone(), port), handle, piface)
}

#[test]
fn test_poll_without_hardware() {
    let piface = Arc::new(Piface::new(NullBus));
    let dispatcher = Dispatcher::new(piface, 50210);
    assert_eq!(
        dispatcher.dispatch("/poll"),
        "_problem The Digital 2 Piface is not connected.\n"
    );
}

#[test]
fn test_poll_reply_format() {
    // 输入电平在驱动构造前注入，声呐回波位（0x80）保持低，
    // 不会出现可接受的回波沿，距离恒为 0
    let chip = MockExpanderChip::new();
    let handle = chip.handle();
    handle.set_inputs(0b0000_0101);
    let dispatcher = Dispatcher::new(Arc::new(Piface::new(chip)), 50210);
    assert_eq!(
        dispatcher.dispatch("/poll"),
        "i/0 true\n\
         i/1 false\n\
         o/0 false\n\
         i/2 true\n\
         o/1 false\n\
         i/3 false\n\
         i/4 false\n\
         i/5 false\n\
         i/6 false\n\
         d 0\n"
    );
}

#[test]
fn test_output_set_then_poll() {
    let (dispatcher, _handle) = ready_dispatcher(50210);
    assert_eq!(dispatcher.dispatch("/o/0/true"), "okay\n");
    let poll = dispatcher.dispatch("/poll");
    assert!(poll.contains("o/0 true\n"), "poll was: {poll}");
    assert!(poll.contains("o/1 false\n"));

    assert_eq!(dispatcher.dispatch("/o/0/false"), "okay\n");
    assert!(dispatcher.dispatch("/poll").contains("o/0 false\n"));
}

#[test]
fn test_output_second_bit() {
    let (dispatcher, handle) = ready_dispatcher(50210);
    assert_eq!(dispatcher.dispatch("/o/1/true"), "okay\n");
    assert_ne!(handle.output_latch() & 0x04, 0);
    assert!(dispatcher.dispatch("/poll").contains("o/1 true\n"));
}

#[test]
fn test_output_invalid_bit() {
    let (dispatcher, _handle) = ready_dispatcher(50210);
    // 越界编号：专属错误行，没有换行
    assert_eq!(dispatcher.dispatch("/o/5/true"), "_problem invalid bit");
    assert_eq!(dispatcher.dispatch("/o/0"), "_problem invalid bit");
    // 参数根本不是数字：走未知命令兜底
    assert_eq!(
        dispatcher.dispatch("/o/x/true"),
        "_problem unknown command: /o/x/true\n"
    );
}

#[test]
fn test_full_power_forward_holds_bit() {
    let (dispatcher, handle) = ready_dispatcher(50210);
    assert_eq!(dispatcher.dispatch("/md/0/Forward"), "okay\n");
    assert_eq!(dispatcher.dispatch("/mp/0/6"), "okay\n");

    // 档位 6 从不关断：整个周期里正转位持续有效
    thread::sleep(Duration::from_millis(30));
    for _ in 0..10 {
        let latch = handle.output_latch();
        assert_ne!(latch & MOTOR_BIT_FORWARD[0], 0);
        assert_eq!(latch & MOTOR_BIT_BACK[0], 0);
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn test_power_clamp_via_commands() {
    let (dispatcher, _handle, piface) = ready_dispatcher_with_piface(50210);
    assert_eq!(dispatcher.dispatch("/mp/0/-5"), "okay\n");
    assert_eq!(piface.motors().duty(0).unwrap(), DutyCycle::from_power(0));
    assert_eq!(dispatcher.dispatch("/mp/0/99"), "okay\n");
    assert_eq!(piface.motors().duty(0).unwrap(), DutyCycle::from_power(6));
}

#[test]
fn test_motor_argument_errors() {
    let (dispatcher, _handle) = ready_dispatcher(50210);
    assert_eq!(dispatcher.dispatch("/md/7/Forward"), "_problem: invalid motor id\n");
    assert_eq!(dispatcher.dispatch("/md/x/Forward"), "_problem: invalid motor id\n");
    assert_eq!(dispatcher.dispatch("/mp/0/x"), "_problem: invalid motor id\n");
    assert_eq!(dispatcher.dispatch("/mp/7/3"), "_problem: invalid motor id\n");
    // 参数缺失：未知命令兜底
    assert_eq!(
        dispatcher.dispatch("/md/0"),
        "_problem unknown command: /md/0\n"
    );
}

#[test]
fn test_unknown_direction_falls_back_to_stopped() {
    let (dispatcher, handle) = ready_dispatcher(50210);
    assert_eq!(dispatcher.dispatch("/mp/0/6"), "okay\n");
    assert_eq!(dispatcher.dispatch("/md/0/Sideways"), "okay\n");
    thread::sleep(Duration::from_millis(20));
    let latch = handle.output_latch();
    assert_eq!(latch & (MOTOR_BIT_FORWARD[0] | MOTOR_BIT_BACK[0]), 0);
}

#[test]
fn test_reset_all_stops_motors() {
    let (dispatcher, handle) = ready_dispatcher(50210);
    assert_eq!(dispatcher.dispatch("/md/0/Forward"), "okay\n");
    assert_eq!(dispatcher.dispatch("/md/1/Reverse"), "okay\n");
    assert_eq!(dispatcher.dispatch("/mp/0/6"), "okay\n");
    assert_eq!(dispatcher.dispatch("/mp/1/6"), "okay\n");
    thread::sleep(Duration::from_millis(20));

    assert_eq!(dispatcher.dispatch("/reset_all"), "okay\n");
    thread::sleep(Duration::from_millis(20));
    let motor_bits =
        MOTOR_BIT_FORWARD[0] | MOTOR_BIT_BACK[0] | MOTOR_BIT_FORWARD[1] | MOTOR_BIT_BACK[1];
    for _ in 0..10 {
        assert_eq!(handle.output_latch() & motor_bits, 0);
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn test_crossdomain_policy() {
    let (dispatcher, _handle) = ready_dispatcher(50210);
    assert_eq!(
        dispatcher.dispatch("/crossdomain.xml"),
        "<cross-domain-policy><allow-access-from domain=\"*\" to-ports=\"50210\"/></cross-domain-policy>\n"
    );
}

#[test]
fn test_unknown_command_echoes_request() {
    let (dispatcher, _handle) = ready_dispatcher(50210);
    assert_eq!(
        dispatcher.dispatch("foo/bar"),
        "_problem unknown command: foo/bar\n"
    );
    assert_eq!(dispatcher.dispatch(""), "_problem unknown command: \n");
}
