//! 处理器状态管理，用于控制中断开关与嵌套计数

use array_macro::array;

use crate::consts::NCPU;

/// # 功能说明
/// 中断与处理器原语的注册表。开关中断、读取中断使能位、
/// 读取当前 cpu 编号都是体系结构相关的指令（cli/sti/pushf/lapicid），
/// 由外层内核在启动时通过 `init_intr_ops` 注册进来，
/// 本 crate 内部只通过下面的包装函数访问。
///
/// # 安全性
/// - 注册必须发生在启动早期、任何自旋锁被使用之前，
///   此后注册表只读，不存在并发写。
pub struct IntrOps {
    pub intr_on: fn(),
    pub intr_off: fn(),
    pub intr_get: fn() -> bool,
    pub cpu_id: fn() -> usize,
}

static mut INTR_OPS: Option<IntrOps> = None;

/// 注册中断原语，必须在启动早期、开启其他核之前调用一次。
pub unsafe fn init_intr_ops(ops: IntrOps) {
    INTR_OPS = Some(ops);
}

#[inline]
fn ops() -> Option<&'static IntrOps> {
    unsafe { INTR_OPS.as_ref() }
}

/// 开启当前 CPU 的中断。未注册原语时为空操作。
#[inline]
pub fn intr_on() {
    if let Some(o) = ops() {
        (o.intr_on)();
    }
}

/// 关闭当前 CPU 的中断。未注册原语时为空操作。
#[inline]
pub fn intr_off() {
    if let Some(o) = ops() {
        (o.intr_off)();
    }
}

/// 读取当前 CPU 的中断使能状态。未注册原语时视为关闭。
#[inline]
pub fn intr_get() -> bool {
    ops().map_or(false, |o| (o.intr_get)())
}

/// 读取当前 cpu 编号。
/// 必须在禁用中断的情况下调用，
/// 以防止与进程被迁移到另一个 CPU 时出现竞争条件。
#[inline]
pub fn cpu_id() -> usize {
    #[cfg(not(test))]
    {
        ops().map_or(0, |o| (o.cpu_id)())
    }
    #[cfg(test)]
    {
        host::id()
    }
}

/// 所有 CPU 核心状态的数组，长度为系统支持的最大 CPU 数量 `NCPU`。
/// 每个元素只由对应 CPU 核心本地访问，不需要额外的锁保护。
static mut CPU_MANAGER: CpuManager = CpuManager::new();

struct CpuManager {
    table: [Cpu; NCPU],
}

impl CpuManager {
    const fn new() -> Self {
        Self {
            table: array![_ => Cpu::new(); NCPU],
        }
    }

    /// 返回当前 CPU 的 cpu 结构体的可变引用。
    /// 必须禁用中断。
    unsafe fn my_cpu_mut(&mut self) -> &mut Cpu {
        let id = cpu_id();
        &mut self.table[id]
    }
}

/// 单个 CPU 核心的中断关闭嵌套状态。
struct Cpu {
    /// 关闭中断的嵌套计数，表示当前中断被禁止的层数。
    noff: u8,
    /// 中断使能标志，记录关闭中断之前的中断使能状态，
    /// 用于恢复中断使能。
    intena: bool,
}

impl Cpu {
    const fn new() -> Self {
        Self {
            noff: 0,
            intena: false,
        }
    }
}

/// # 功能说明
/// 关闭当前 CPU 的中断，并记录中断关闭的嵌套次数。
/// 与 `intr_off()` 类似，但支持成对使用，
/// 多次调用 `push_off()` 需要相应次数的 `pop_off()` 才能恢复中断状态。
/// 如果中断原本就是关闭状态，调用后保持关闭。
pub fn push_off() {
    let old = intr_get();
    intr_off();
    #[cfg(not(test))]
    {
        let c = unsafe { CPU_MANAGER.my_cpu_mut() };
        if c.noff == 0 {
            c.intena = old;
        }
        c.noff += 1;
    }
    #[cfg(test)]
    {
        if host::NOFF.with(|n| n.get()) == 0 {
            host::INTENA.with(|i| i.set(old));
        }
        host::NOFF.with(|n| n.set(n.get() + 1));
    }
}

/// # 功能说明
/// 解除之前通过 `push_off()` 关闭的中断，
/// 通过嵌套计数控制中断恢复，
/// 只有所有嵌套的关闭操作都对应调用后，
/// 才真正重新开启中断。
///
/// # 可能的错误
/// - 如果在中断已开启时调用，会 panic。
/// - 如果调用次数与 `push_off()` 不匹配，panic 保护。
pub fn pop_off() {
    if intr_get() {
        panic!("pop_off(): interruptable");
    }
    #[cfg(not(test))]
    {
        let c = unsafe { CPU_MANAGER.my_cpu_mut() };
        if c.noff.checked_sub(1).is_none() {
            panic!("pop_off(): count not match");
        }
        c.noff -= 1;
        if c.noff == 0 && c.intena {
            intr_on();
        }
    }
    #[cfg(test)]
    {
        let noff = host::NOFF.with(|n| n.get());
        if noff.checked_sub(1).is_none() {
            panic!("pop_off(): count not match");
        }
        host::NOFF.with(|n| n.set(noff - 1));
        if noff == 1 && host::INTENA.with(|i| i.get()) {
            intr_on();
        }
    }
}
