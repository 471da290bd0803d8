//! x86 保护模式内核的陷入处理层：
//! 系统调用分发、时钟中断、崩溃诊断与用户页写保护。
//! 外层内核实现 [`kernel::Kernel`] 接口并在陷入入口调用 [`trap::trap`]。

#![cfg_attr(not(test), no_std)]
#![allow(dead_code)]
#![warn(rust_2018_idioms)]

#[macro_use]
extern crate bitflags;

#[macro_use]
pub mod printf;

pub mod consts;
pub mod crash;
pub mod kernel;
pub mod mm;
pub mod process;
pub mod spinlock;
pub mod trap;

#[cfg(test)]
mod fake;

/// 裸机冒烟测试入口，由外层内核在启动完成后调用
#[cfg(all(feature = "unit_test", not(test)))]
pub fn test_main_entry() {
    let cpu_id = process::cpu::cpu_id();

    // 只需要在单个硬件线程上执行的测试用例
    if cpu_id == 0 {
        spinlock::tests::smoke();
    }

    // 需要在多个硬件线程上执行的测试用例
    printf::tests::println_simo();

    if cpu_id == 0 {
        println!("all tests pass.");
    }
}
