//! 所有系统调用接口实现

use core::convert::TryFrom;
use core::fmt::Display;
use core::mem;

use crate::consts::{
    SYS_EXIT, SYS_FORK, SYS_GETPID, SYS_KILL, SYS_SBRK, SYS_SLEEP, SYS_UPTIME, SYS_WAIT,
    SYS_WRPROTECT,
};
use crate::kernel::Kernel;
use crate::mm::{Addr, VirtAddr};
use crate::trap;

use super::Proc;

/// 系统调用结果类型
pub type SysResult = Result<usize, ()>;

/// 系统调用 trait 定义
///
/// 包含本内核支持的系统调用方法，由 `Proc` 结构体实现。
/// 进程生命周期类调用只做参数搬运，真正的实现通过
/// `Kernel` 接口转发给外层内核。
pub trait Syscall {
    fn sys_fork(&self, k: &dyn Kernel) -> SysResult;
    fn sys_exit(&self, k: &dyn Kernel) -> SysResult;
    fn sys_wait(&self, k: &dyn Kernel) -> SysResult;
    fn sys_kill(&self, k: &dyn Kernel) -> SysResult;
    fn sys_getpid(&self, k: &dyn Kernel) -> SysResult;
    fn sys_sbrk(&self, k: &dyn Kernel) -> SysResult;
    fn sys_sleep(&self, k: &dyn Kernel) -> SysResult;
    fn sys_uptime(&self, k: &dyn Kernel) -> SysResult;
    fn sys_wrprotect(&self, k: &dyn Kernel) -> SysResult;
}

/// 为进程实现系统调用接口
impl Syscall for Proc {
    /// 创建当前进程的副本，转发给外层内核
    fn sys_fork(&self, k: &dyn Kernel) -> SysResult {
        let ret = k.fork();

        #[cfg(feature = "trace_syscall")]
        println!("[{}].fork() = {:?}(pid)", self.excl.lock().pid, ret);

        ret
    }

    /// 终止当前进程，调用后不返回用户态
    fn sys_exit(&self, k: &dyn Kernel) -> SysResult {
        #[cfg(feature = "trace_syscall")]
        println!("[{}].exit()", self.excl.lock().pid);

        k.exit()
    }

    /// 等待任意子进程退出，返回其 pid
    fn sys_wait(&self, k: &dyn Kernel) -> SysResult {
        let ret = k.wait();

        #[cfg(feature = "trace_syscall")]
        println!("[{}].wait() = {:?}(pid)", self.excl.lock().pid, ret);

        ret
    }

    /// 向 pid 指定的进程发送终止标记
    fn sys_kill(&self, k: &dyn Kernel) -> SysResult {
        let pid = self.arg_i32(0)?;
        if pid < 0 {
            return Err(());
        }
        let pid = pid as usize;
        let ret = k.kill(pid);

        #[cfg(feature = "trace_syscall")]
        println!("[{}].kill(pid={}) = {:?}", self.excl.lock().pid, pid, ret);

        ret
    }

    /// 返回当前进程的 PID
    fn sys_getpid(&self, _k: &dyn Kernel) -> SysResult {
        let pid = self.excl.lock().pid;

        #[cfg(feature = "trace_syscall")]
        println!("[{}].getpid() = {}", pid, pid);

        Ok(pid)
    }

    /// 伸缩进程地址空间，返回原来的大小（即新内存的起始地址）
    fn sys_sbrk(&self, k: &dyn Kernel) -> SysResult {
        let increment = self.arg_i32(0)?;
        let addr = self.sz();
        let ret = k.grow(increment).map(|_| addr);

        #[cfg(feature = "trace_syscall")]
        println!("[{}].sbrk({}) = {:?}", self.excl.lock().pid, increment, ret);

        ret
    }

    /// 使当前进程休眠指定数量的时钟周期
    fn sys_sleep(&self, k: &dyn Kernel) -> SysResult {
        let count = self.arg_i32(0)?;
        if count < 0 {
            return Err(());
        }
        let count = count as usize;
        let ret = trap::clock_sleep(k, self, count);

        #[cfg(feature = "trace_syscall")]
        println!("[{}].sleep({}) = {:?}", self.excl.lock().pid, count, ret);

        ret.map(|()| 0)
    }

    /// 返回系统启动以来的时钟周期数
    fn sys_uptime(&self, _k: &dyn Kernel) -> SysResult {
        let ret = trap::clock_read();

        #[cfg(feature = "trace_syscall")]
        println!("[{}].uptime() = {}", self.excl.lock().pid, ret);

        Ok(ret)
    }

    /// 撤销一段用户内存的写权限
    ///
    /// # 参数
    /// - 参数 0：起始地址，按指针校验（结合参数 1 的长度）
    /// - 参数 1：字节数
    ///
    /// # 返回值
    /// - 成功：返回 0
    /// - 错误：返回 Err(())
    fn sys_wrprotect(&self, k: &dyn Kernel) -> SysResult {
        let size = self.arg_i32(1)?;
        let addr = self.arg_ptr(0, size)?;
        let ret = self.wrprotect(k, addr, size as usize);

        #[cfg(feature = "trace_syscall")]
        println!(
            "[{}].wrprotect(addr={:#x}, size={}) = {:?}",
            self.excl.lock().pid,
            addr,
            size,
            ret
        );

        ret.map(|()| 0)
    }
}

impl Proc {
    /// # 功能说明
    /// 处理当前进程发起的系统调用请求。根据陷阱帧中 eax 保存的
    /// 系统调用号分发到对应实现，并把结果写回 eax：
    /// 成功写入返回值，失败写入 -1。
    ///
    /// # 流程解释
    /// 1. 读取陷阱帧中的调用号（eax）。
    /// 2. 按调用号匹配到对应的 `sys_*` 实现。
    /// 3. 未知调用号打印进程信息与调用号，按失败处理，不会使内核崩溃。
    /// 4. 将结果写回陷阱帧的 eax。
    ///
    /// # 安全性
    /// - 使用 `unsafe` 解引用陷阱帧指针，调用前分发器必须已把
    ///   当前陷阱帧挂到进程上。
    pub fn syscall(&self, k: &dyn Kernel) {
        let num = unsafe { self.data.get().as_ref().unwrap().tf.as_ref().unwrap().eax };
        let sys_result = match num {
            SYS_FORK => self.sys_fork(k),
            SYS_EXIT => self.sys_exit(k),
            SYS_WAIT => self.sys_wait(k),
            SYS_KILL => self.sys_kill(k),
            SYS_GETPID => self.sys_getpid(k),
            SYS_SBRK => self.sys_sbrk(k),
            SYS_SLEEP => self.sys_sleep(k),
            SYS_UPTIME => self.sys_uptime(k),
            SYS_WRPROTECT => self.sys_wrprotect(k),
            _ => {
                println!(
                    "{} {}: unknown sys call {}",
                    self.excl.lock().pid,
                    self.name(),
                    num
                );
                Err(())
            }
        };
        let tf = unsafe { self.data.get().as_ref().unwrap().tf.as_mut().unwrap() };
        tf.eax = match sys_result {
            Ok(ret) => ret as u32,
            Err(()) => -1i32 as u32,
        };
    }

    /// # 功能说明
    /// 撤销 `[addr, addr+size)` 覆盖的每一页的写权限。
    /// 范围已由 `arg_ptr` 校验。任何一页缺失映射都会失败返回；
    /// 此时已处理的页保持撤销后的状态，既不回滚也不刷新。
    /// 全部页处理完后整体刷新一次地址翻译缓存，使新权限立即生效。
    ///
    /// # 参数
    /// - `addr`: 起始虚拟地址；
    /// - `size`: 字节数，为 0 时直接成功，不触碰任何页。
    ///
    /// # 可能的错误
    /// - 范围内某页没有映射。
    fn wrprotect(&self, k: &dyn Kernel, addr: usize, size: usize) -> Result<(), ()> {
        if size == 0 {
            return Ok(());
        }
        let pgdir = unsafe { self.pgdir_mut() }.ok_or(())?;
        let mut a = VirtAddr::try_from(addr).map_err(syscall_warning)?;
        a.pg_round_down();
        let mut last = VirtAddr::try_from(addr + size - 1).map_err(syscall_warning)?;
        last.pg_round_down();
        loop {
            match pgdir.locate(a, false) {
                Some(pte) => pte.clear_writable(),
                None => {
                    syscall_warning("wrprotect: page not mapped");
                    return Err(());
                }
            }
            if a == last {
                break;
            }
            a.add_page();
        }
        k.flush_tlb(pgdir.root());
        Ok(())
    }

    /// 从当前陷阱帧取第 `n` 个系统调用参数的原始值。
    /// x86 的参数在用户栈上，第 `n` 个位于 `esp + 4 + 4*n`，
    /// 槽位地址回绕或超出进程地址空间时失败。
    fn arg_raw(&self, n: usize) -> Result<u32, ()> {
        let tf = unsafe { self.data.get().as_ref().unwrap().tf.as_ref().unwrap() };
        let slot = (tf.esp as usize)
            .checked_add(4 + 4 * n)
            .ok_or("arg slot addr overflow")
            .map_err(syscall_warning)?;
        self.fetch_u32(slot).map_err(syscall_warning)
    }

    /// 获取 32 位整型参数。
    /// 注意：在 u32 和 i32 之间会进行as转换
    #[inline]
    fn arg_i32(&self, n: usize) -> Result<i32, ()> {
        self.arg_raw(n).map(|v| v as i32)
    }

    /// # 功能说明
    /// 获取第 `n` 个参数并按用户指针解释，
    /// 校验 `[ptr, ptr+size)` 完全落在进程地址空间之内。
    /// 这是内核对用户递入指针的唯一防线。
    ///
    /// # 可能的错误
    /// - `size` 为负；
    /// - 指针本身越界，或加上长度后越界（含加法溢出）。
    fn arg_ptr(&self, n: usize, size: i32) -> Result<usize, ()> {
        let addr = self.arg_raw(n)? as usize;
        if size < 0 {
            return Err(());
        }
        let sz = self.sz();
        match addr.checked_add(size as usize) {
            Some(end) if addr < sz && end <= sz => Ok(addr),
            _ => Err(()),
        }
    }

    /// 从用户虚拟地址 `addr` 处读取一个 32 位字，
    /// 读取范围越过进程地址空间时失败。
    fn fetch_u32(&self, addr: usize) -> Result<u32, &'static str> {
        let sz = self.sz();
        if addr >= sz || addr + mem::size_of::<u32>() > sz {
            return Err("input addr > proc's mem size");
        }
        let va = VirtAddr::try_from(addr)?;
        let pgdir = unsafe { self.pgdir_mut() }.ok_or("proc has no page directory")?;
        pgdir.copy_in_u32(va).map_err(|_| "pagetable copy_in error")
    }
}

/// 按 feature 输出系统调用告警，用作 `map_err` 的吸收器
fn syscall_warning<T: Display>(_s: T) {
    #[cfg(feature = "kernel_warning")]
    println!("syscall warning: {}", _s);
}
