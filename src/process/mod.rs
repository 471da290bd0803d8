//! 进程抽象
//! 进程的创建、销毁与调度属于外层内核，
//! 这里只保留陷阱处理路径需要读写的那部分状态。

use core::cell::UnsafeCell;
use core::cmp::min;
use core::ptr::{self, NonNull};
use core::sync::atomic::AtomicBool;

use crate::mm::PageDirectory;
use crate::spinlock::SpinLock;

pub mod cpu;
pub mod syscall;
mod trapframe;

pub use trapframe::TrapFrame;

/// 进程调度状态
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum ProcState {
    UNUSED,
    SLEEPING,
    RUNNABLE,
    RUNNING,
    ALLOCATED,
    ZOMBIE,
}

/// 需要持有进程锁才能访问的内容
pub struct ProcExcl {
    pub state: ProcState,
    pub pid: usize,
}

impl ProcExcl {
    const fn new() -> Self {
        Self {
            state: ProcState::UNUSED,
            pid: 0,
        }
    }
}

/// 进程私有数据，不加锁
///
/// 只由进程自身在内核态访问，
/// 或在构造阶段由外层内核通过 `&mut` 独占访问。
pub struct ProcData {
    /// 用户地址空间大小（字节）
    pub sz: usize,
    /// 进程名，nul 结尾
    pub name: [u8; 16],
    /// 进程页目录，由外层内核创建并挂入
    pub pgdir: Option<NonNull<dyn PageDirectory>>,
    /// 陷入内核期间指向当前陷阱帧
    pub tf: *mut TrapFrame,
}

impl ProcData {
    const fn new() -> Self {
        Self {
            sz: 0,
            name: [0; 16],
            pgdir: None,
            tf: ptr::null_mut(),
        }
    }
}

/// 进程控制块中与陷阱处理相关的部分。
///
/// 分为三块：自旋锁保护的 `excl`（状态与 pid）、
/// 进程自身独占的 `data`（地址空间大小、页目录、陷阱帧指针）、
/// 以及可供任意上下文置位的 `killed` 标志。
/// `killed` 只在明确的检查点生效，置位本身从不抢占。
pub struct Proc {
    pub excl: SpinLock<ProcExcl>,
    pub data: UnsafeCell<ProcData>,
    pub killed: AtomicBool,
}

// 跨核共享进程控制块，内部约定见各字段说明
unsafe impl Sync for Proc {}

impl Proc {
    pub const fn new() -> Self {
        Self {
            excl: SpinLock::new(ProcExcl::new(), "proc"),
            data: UnsafeCell::new(ProcData::new()),
            killed: AtomicBool::new(false),
        }
    }

    /// 构造阶段填入 pid 与进程名，发布给其他核之前调用
    pub fn setup(&mut self, pid: usize, name: &str) {
        self.excl.lock().pid = pid;
        let data = self.data.get_mut();
        let bytes = name.as_bytes();
        let n = min(bytes.len(), data.name.len() - 1);
        data.name[..n].copy_from_slice(&bytes[..n]);
        data.name[n] = 0;
    }

    /// 构造阶段设定地址空间大小
    pub fn set_sz(&mut self, sz: usize) {
        self.data.get_mut().sz = sz;
    }

    /// 挂入进程页目录
    ///
    /// # 安全性
    /// 指针必须在进程存活期间保持有效，空指针表示卸下页目录。
    pub unsafe fn set_pgdir(&mut self, pgdir: *mut dyn PageDirectory) {
        self.data.get_mut().pgdir = NonNull::new(pgdir);
    }

    pub fn pid(&self) -> usize {
        self.excl.lock().pid
    }

    /// 进程名，setup 之后只读
    pub fn name(&self) -> &str {
        let data = unsafe { &*self.data.get() };
        let len = data
            .name
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(data.name.len());
        core::str::from_utf8(&data.name[..len]).unwrap_or("???")
    }

    /// 用户地址空间大小
    pub fn sz(&self) -> usize {
        unsafe { (*self.data.get()).sz }
    }

    /// 取进程页目录的可变引用
    ///
    /// # 安全性
    /// 调用者必须保证此刻没有其他上下文访问同一页目录。
    pub unsafe fn pgdir_mut(&self) -> Option<&mut dyn PageDirectory> {
        let data = &mut *self.data.get();
        match data.pgdir.as_mut() {
            Some(pgdir) => Some(pgdir.as_mut()),
            None => None,
        }
    }
}
