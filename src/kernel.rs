//! 外层内核接口
//! 陷阱分发层自身不实现进程生命周期、调度、设备驱动和
//! 特权指令，全部通过这个接口回调外层内核。

use core::num::Wrapping;

use crate::mm::PhysAddr;
use crate::process::syscall::SysResult;
use crate::process::Proc;
use crate::spinlock::SpinLockGuard;

/// 由外层内核实现的协作接口。
///
/// 陷阱分发在中断上下文里运行，接口内的每个调用都必须
/// 满足调用点注明的约束（如 `sleep_on` 会让出 CPU，
/// 只能在进程上下文调用）。
pub trait Kernel {
    /// 当前 CPU 上正在运行的进程，中断上下文可能没有
    fn myproc(&self) -> Option<&Proc>;

    /// 当前 cpu 编号，时钟只在 0 号 cpu 上推进
    fn cpu_id(&self) -> usize;

    /// 读取触发页错误的虚拟地址（cr2）
    fn fault_address(&self) -> usize;

    /// 整体刷新 `root` 页目录的地址翻译缓存（重载 cr3）
    fn flush_tlb(&self, root: PhysAddr);

    /// 应答中断控制器（EOI）
    fn ack_intr(&self);

    /// 存储设备中断处理
    fn disk_intr(&self);

    /// 键盘中断处理
    fn keyboard_intr(&self);

    /// 串口中断处理
    fn uart_intr(&self);

    /// 唤醒所有睡在 `channel` 上的进程
    fn wakeup(&self, channel: usize);

    /// # 功能说明
    /// 让当前进程睡在 `channel` 上，并在登记完成后释放传入的
    /// 时钟锁守卫，被唤醒后返回（此时时钟锁已不再持有）。
    ///
    /// # 安全性
    /// - 守卫必须先于进程状态切换释放，由实现方保证先登记后释放，
    ///   否则会与 `wakeup` 构成丢失唤醒竞争。
    fn sleep_on(&self, channel: usize, guard: SpinLockGuard<'_, Wrapping<usize>>);

    /// 当前进程主动让出 CPU
    fn yield_cpu(&self);

    /// 终止当前进程，不返回
    fn exit(&self) -> !;

    /// 创建子进程，返回子进程 pid
    fn fork(&self) -> SysResult;

    /// 等待子进程退出
    fn wait(&self) -> SysResult;

    /// 将 `pid` 对应进程标记为 killed
    fn kill(&self, pid: usize) -> SysResult;

    /// 按 `delta` 字节伸缩当前进程的地址空间
    fn grow(&self, delta: i32) -> SysResult;
}
