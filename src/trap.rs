//! 中断处理模块，用户或内核模式下发生中断、异常或系统调用时进行分发处理

use core::num::Wrapping;
use core::sync::atomic::Ordering;

use array_macro::array;
use bit_field::BitField;

use crate::consts::{DPL_USER, FEC_WPU, IRQ_COM1, IRQ_IDE, IRQ_KBD, IRQ_SPURIOUS, IRQ_TIMER,
    SEG_KCODE, STS_IG32, STS_TG32, T_IRQ0, T_SYSCALL};
use crate::crash;
use crate::kernel::Kernel;
use crate::mm::VirtAddr;
use crate::process::{Proc, ProcState, TrapFrame};
use crate::spinlock::SpinLock;

/// 中断描述符表中的一个门描述符
///
/// 64 位布局（从低位到高位）：
/// - 0..16:  处理程序入口偏移的低 16 位
/// - 16..32: 代码段选择子
/// - 32..40: 参数个数与保留位，恒为 0
/// - 40..44: 门类型，[`STS_IG32`] 或 [`STS_TG32`]
/// - 44:     系统段标志，恒为 0
/// - 45..47: 触发门所需的特权级
/// - 47:     存在位
/// - 48..64: 处理程序入口偏移的高 16 位
#[repr(transparent)]
#[derive(Clone, Copy)]
pub struct GateDesc(u64);

impl GateDesc {
    const fn empty() -> Self {
        Self(0)
    }

    /// 构造一个指向 `offset` 处理程序的门描述符
    ///
    /// # 参数
    /// - `offset`: 处理程序入口的段内偏移
    /// - `selector`: 代码段选择子
    /// - `is_trap`: 真为陷阱门（进门不关中断），假为中断门
    /// - `dpl`: 从该门进入所需的特权级
    pub fn new(offset: u32, selector: u16, is_trap: bool, dpl: usize) -> Self {
        let mut desc: u64 = 0;
        desc.set_bits(0..16, (offset & 0xffff) as u64);
        desc.set_bits(16..32, selector as u64);
        desc.set_bits(40..44, if is_trap { STS_TG32 } else { STS_IG32 });
        desc.set_bits(45..47, dpl as u64);
        desc.set_bit(47, true);
        desc.set_bits(48..64, (offset >> 16) as u64);
        Self(desc)
    }

    pub fn offset(&self) -> u32 {
        (self.0.get_bits(0..16) | (self.0.get_bits(48..64) << 16)) as u32
    }

    pub fn selector(&self) -> u16 {
        self.0.get_bits(16..32) as u16
    }

    pub fn dpl(&self) -> usize {
        self.0.get_bits(45..47) as usize
    }

    pub fn is_present(&self) -> bool {
        self.0.get_bit(47)
    }

    pub fn is_trap_gate(&self) -> bool {
        self.0.get_bits(40..44) == STS_TG32
    }
}

/// 中断描述符表，所有 CPU 共用一份
#[repr(C, align(8))]
pub struct Idt {
    entries: [GateDesc; 256],
}

impl Idt {
    /// 依据 256 个入口地址构造整张中断描述符表
    ///
    /// # 功能说明
    /// 所有向量一律设为内核代码段上的中断门，特权级 0，
    /// 用户程序无法随意触发；唯独系统调用向量设为陷阱门并放开到
    /// 用户特权级，`int` 指令才能从用户态进来，且进门不关中断。
    ///
    /// # 参数
    /// - `vectors`: 按向量号排列的 256 个入口地址
    ///
    /// # 返回值
    /// 构造好的描述符表，由调用方放置并用 `lidt` 加载
    pub fn new(vectors: &[u32; 256]) -> Self {
        let mut entries = array![_ => GateDesc::empty(); 256];
        for (i, gate) in entries.iter_mut().enumerate() {
            *gate = GateDesc::new(vectors[i], (SEG_KCODE << 3) as u16, false, 0);
        }
        entries[T_SYSCALL] = GateDesc::new(vectors[T_SYSCALL], (SEG_KCODE << 3) as u16, true, DPL_USER);

        #[cfg(feature = "verbose_init_info")]
        println!("idt: {} gates, syscall gate at vector {}", entries.len(), T_SYSCALL);

        Self { entries }
    }

    pub fn gates(&self) -> &[GateDesc; 256] {
        &self.entries
    }
}

/// 陷入原因，由向量号与陷入现场归类得出
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum TrapCause {
    /// 用户程序的系统调用
    Syscall,
    /// 时钟中断
    Timer,
    /// IDE 磁盘中断
    Disk,
    /// IDE1 的伪中断，Bochs 会随机产生
    DiskSpur,
    /// 键盘中断
    Keyboard,
    /// 串口中断
    Uart,
    /// 伪中断
    Spurious,
    /// 用户态的意外陷入，当作进程自身出错处理
    UnknownUser,
    /// 内核态的意外陷入，只能是内核错误
    UnknownKernel,
}

/// 把向量号归类成陷入原因
///
/// 向量表之外的陷入按现场归类：没有当前进程或来自内核态的
/// 算内核错误，其余算用户进程出错。
fn classify(trapno: usize, from_user: bool, has_proc: bool) -> TrapCause {
    if trapno == T_SYSCALL {
        return TrapCause::Syscall;
    }
    if trapno == T_IRQ0 + IRQ_TIMER {
        TrapCause::Timer
    } else if trapno == T_IRQ0 + IRQ_IDE {
        TrapCause::Disk
    } else if trapno == T_IRQ0 + IRQ_IDE + 1 {
        TrapCause::DiskSpur
    } else if trapno == T_IRQ0 + IRQ_KBD {
        TrapCause::Keyboard
    } else if trapno == T_IRQ0 + IRQ_COM1 {
        TrapCause::Uart
    } else if trapno == T_IRQ0 + 7 || trapno == T_IRQ0 + IRQ_SPURIOUS {
        TrapCause::Spurious
    } else if !has_proc || !from_user {
        TrapCause::UnknownKernel
    } else {
        TrapCause::UnknownUser
    }
}

/// 统一的陷入处理入口（由 alltraps 保存现场后调用）
///
/// # 功能说明
/// 处理用户态或内核态触发的所有中断、异常和系统调用。
///
/// # 流程解释
/// 1. 系统调用：检查终止标志，把陷入帧挂到进程上，
///    分发系统调用，再查一次终止标志后直接返回；
/// 2. 设备中断：时钟中断仅由 0 号 CPU 推进全局时钟，
///    磁盘、键盘、串口交给对应驱动，处理完应答中断控制器；
///    IDE1 的伪中断静默丢弃且不应答；
/// 3. 意外陷入：内核态打印诊断后 panic；用户态打印诊断后，
///    若是写保护页引起的缺页则尝试解除保护并恢复执行，
///    否则标记进程终止；
/// 4. 收尾：被终止且来自用户态的进程强制退出；时钟中断时
///    让出 CPU；让出回来后再查一次终止标志。
///
/// # 参数
/// - `k`: 内核服务接口
/// - `tf`: 陷入现场，系统调用的返回值写回其中的 eax
///
/// # 可能的错误
/// 内核态的意外陷入会 panic，其余错误都落在进程身上。
pub fn trap(k: &dyn Kernel, tf: &mut TrapFrame) {
    let p = k.myproc();

    match classify(tf.trapno as usize, tf.from_user(), p.is_some()) {
        TrapCause::Syscall => {
            let p = match p {
                Some(p) => p,
                None => panic!("syscall with no process"),
            };
            if p.killed.load(Ordering::Relaxed) {
                k.exit();
            }
            // 参数要从陷入帧里取，先挂到进程上
            unsafe {
                (*p.data.get()).tf = tf as *mut TrapFrame;
            }
            p.syscall(k);
            if p.killed.load(Ordering::Relaxed) {
                k.exit();
            }
            return;
        }
        TrapCause::Timer => {
            // 全局时钟只由 0 号 CPU 推进
            if k.cpu_id() == 0 {
                clock_intr(k);
            }
            k.ack_intr();
        }
        TrapCause::Disk => {
            k.disk_intr();
            k.ack_intr();
        }
        TrapCause::DiskSpur => {
            // Bochs 会产生 IDE1 的伪中断，静默丢弃，不应答
        }
        TrapCause::Keyboard => {
            k.keyboard_intr();
            k.ack_intr();
        }
        TrapCause::Uart => {
            k.uart_intr();
            k.ack_intr();
        }
        TrapCause::Spurious => {
            println!("cpu{}: spurious interrupt at {:x}:{:x}",
                k.cpu_id(), tf.cs, tf.eip);
            k.ack_intr();
        }
        TrapCause::UnknownKernel => {
            // 内核态出的异常只能是内核自己的错误
            println!("unexpected trap {} from cpu {} eip {:x} (cr2={:#x})",
                tf.trapno, k.cpu_id(), tf.eip, k.fault_address());
            crash::print_crash_info(tf);
            panic!("trap");
        }
        TrapCause::UnknownUser => {
            let p = match p {
                Some(p) => p,
                None => panic!("user trap with no process"),
            };
            println!("pid {} {}: trap {} err {} on cpu {} eip {:#x} addr {:#x}--kill proc",
                p.pid(), p.name(), tf.trapno, tf.err, k.cpu_id(), tf.eip, k.fault_address());

            // 打印崩溃现场：用户寄存器和调用栈
            crash::print_crash_info(tf);

            // 写保护页引起的缺页给一次解除保护的机会，其余一律终止
            if tf.err != FEC_WPU || !heal_write_fault(k, p, tf) {
                p.killed.store(true, Ordering::Relaxed);
            }
        }
    }

    // 被终止且来自用户态的进程强制退出；
    // 还在内核里执行的让它跑到正常的系统调用返回路径再处理
    if let Some(p) = k.myproc() {
        if p.killed.load(Ordering::Relaxed) && tf.from_user() {
            k.exit();
        }
    }

    // 时钟中断时强制让出 CPU
    if let Some(p) = k.myproc() {
        if p.excl.lock().state == ProcState::RUNNING
            && tf.trapno as usize == T_IRQ0 + IRQ_TIMER
        {
            k.yield_cpu();
        }
    }

    // 让出期间进程可能又被终止，回来再查一次
    if let Some(p) = k.myproc() {
        if p.killed.load(Ordering::Relaxed) && tf.from_user() {
            k.exit();
        }
    }
}

/// 尝试解除写保护页的保护并让进程继续执行
///
/// # 功能说明
/// 页错误的出错地址若落在一个存在但被撤销写权限的页上，
/// 恢复该页写权限并刷新 TLB，进程回到同一条指令重试；
/// 返回是否成功解除。地址越界、页不存在或写权限本来就
/// 完好时不做任何改动。
fn heal_write_fault(k: &dyn Kernel, p: &Proc, tf: &TrapFrame) -> bool {
    let addr = k.fault_address();
    let va = match VirtAddr::try_from(addr) {
        Ok(va) => va,
        Err(_) => return false,
    };
    let pgdir = match unsafe { p.pgdir_mut() } {
        Some(pgdir) => pgdir,
        None => return false,
    };
    let pte = match pgdir.locate(va, false) {
        Some(pte) => pte,
        None => return false,
    };
    if pte.is_writable() {
        // 写权限完好还报缺页，不是写保护干的
        return false;
    }

    println!("Program is trying to access address {:#x} in a write protected page at: {:#x}",
        addr, tf.eip);
    pte.set_writable();
    k.flush_tlb(pgdir.root());
    println!("Unprotect the page and let program run.");
    true
}

/// 全局时钟，计数器由自旋锁保护
struct TickClock {
    ticks: SpinLock<Wrapping<usize>>,
}

impl TickClock {
    const fn new() -> Self {
        Self {
            ticks: SpinLock::new(Wrapping(0), "time"),
        }
    }

    /// 睡眠通道号直接用计数器的地址
    fn channel(&self) -> usize {
        &self.ticks as *const _ as usize
    }

    /// 时钟前进一格并唤醒等在时钟上的进程
    fn tick(&self, k: &dyn Kernel) {
        let mut guard = self.ticks.lock();
        *guard += Wrapping(1);
        k.wakeup(self.channel());
        drop(guard);
    }

    /// 休眠直到时钟前进指定格数
    ///
    /// # 参数
    /// - `k`: 内核服务接口
    /// - `p`: 当前进程引用
    /// - `count`: 要休眠的时钟周期数
    ///
    /// # 返回值
    /// - `Ok(())`: 成功休眠指定周期
    /// - `Err(())`: 休眠期间进程被终止
    fn sleep(&self, k: &dyn Kernel, p: &Proc, count: usize) -> Result<(), ()> {
        let mut guard = self.ticks.lock();
        let old_ticks = *guard; // 记录起始时钟

        while (*guard - old_ticks) < Wrapping(count) {
            // 检查进程终止标志
            if p.killed.load(Ordering::Relaxed) {
                return Err(());
            }

            // 在时钟通道上休眠，计数器锁随 guard 交给内核释放
            k.sleep_on(self.channel(), guard);
            // 唤醒只是提示不是保证，重新拿锁再验条件
            guard = self.ticks.lock();
        }
        Ok(())
    }

    fn read(&self) -> usize {
        self.ticks.lock().0
    }
}

static TICKS: TickClock = TickClock::new();

/// 处理时钟中断（更新全局计数器）
///
/// # 功能说明
/// 增加全局时钟计数并唤醒等待时钟的进程。
/// 由时钟中断处理程序在 0 号 CPU 上调用。
fn clock_intr(k: &dyn Kernel) {
    TICKS.tick(k);
}

/// 使进程休眠指定时钟周期
///
/// # 返回值
/// - `Ok(())`: 成功休眠指定周期
/// - `Err(())`: 休眠期间进程被终止
pub fn clock_sleep(k: &dyn Kernel, p: &Proc, count: usize) -> Result<(), ()> {
    TICKS.sleep(k, p, count)
}

/// 读取当前时钟计数值
///
/// # 返回值
/// 系统启动以来的时钟周期数
pub fn clock_read() -> usize {
    TICKS.read()
}
