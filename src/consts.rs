//! 内核常量定义，x86 保护模式

// 页表相关
pub const PGSIZE: usize = 4096;

/// 用户地址空间上界，即内核映射起点 KERNBASE
pub const MAXVA: usize = 0x8000_0000;

/// 物理内存上界
pub const PHYSTOP: usize = 0xE00_0000;

/// 最多支持的 cpu 数
pub const NCPU: usize = 8;

// trap 向量号
pub const T_PGFLT: usize = 14;
pub const T_SYSCALL: usize = 64;

/// 外部中断向量基址，IRQ 0 映射到向量 32
pub const T_IRQ0: usize = 32;

// IRQ 线号
pub const IRQ_TIMER: usize = 0;
pub const IRQ_KBD: usize = 1;
pub const IRQ_COM1: usize = 4;
pub const IRQ_IDE: usize = 14;
pub const IRQ_SPURIOUS: usize = 31;

/// 页错误错误码：present + write + user
pub const FEC_WPU: u32 = 7;

// 系统调用号
pub const SYS_FORK: u32 = 1;
pub const SYS_EXIT: u32 = 2;
pub const SYS_WAIT: u32 = 3;
pub const SYS_KILL: u32 = 6;
pub const SYS_GETPID: u32 = 11;
pub const SYS_SBRK: u32 = 12;
pub const SYS_SLEEP: u32 = 13;
pub const SYS_UPTIME: u32 = 14;
pub const SYS_WRPROTECT: u32 = 22;

// 段选择子下标与特权级
pub const SEG_KCODE: usize = 1;
pub const SEG_UCODE: usize = 3;
pub const DPL_USER: usize = 0x3;

// 门描述符类型，32 位中断门与陷阱门
pub const STS_IG32: u64 = 0xE;
pub const STS_TG32: u64 = 0xF;

/// 用户栈底的伪返回地址，栈回溯终点
pub const STACK_SENTINEL: usize = 0xffff_ffff;

/// 栈回溯最大层数
pub const MAX_BACKTRACE: usize = 32;
