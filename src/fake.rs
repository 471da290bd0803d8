//! 宿主环境下的测试替身：可脚本化的内核服务接口、假页目录与控制台捕获

use std::cell::{Cell, RefCell};

use core::num::Wrapping;
use core::sync::atomic::Ordering;

use crate::consts::{DPL_USER, FEC_WPU, PGSIZE, SEG_KCODE, SEG_UCODE, T_PGFLT, T_SYSCALL};
use crate::kernel::Kernel;
use crate::mm::{Addr, PageDirectory, PageTableEntry, PhysAddr, PteFlag, VirtAddr};
use crate::printf::console_init;
use crate::process::syscall::SysResult;
use crate::process::{Proc, TrapFrame};
use crate::spinlock::SpinLockGuard;
use crate::trap;

/// 内核服务接口的测试替身，逐项记录调用次数与参数，
/// 返回值可按用例预先设定
pub struct FakeKernel<'a> {
    pub proc: Cell<Option<&'a Proc>>,
    pub cpu: Cell<usize>,
    /// 模拟 cr2 中的页错误地址
    pub cr2: Cell<usize>,
    pub acks: Cell<usize>,
    pub disk_intrs: Cell<usize>,
    pub kbd_intrs: Cell<usize>,
    pub uart_intrs: Cell<usize>,
    pub flushes: Cell<usize>,
    pub flushed_root: Cell<usize>,
    pub wakeups: Cell<usize>,
    pub wakeup_channel: Cell<usize>,
    pub sleeps: Cell<usize>,
    pub yields: Cell<usize>,
    pub exited: Cell<bool>,
    pub kills: RefCell<Vec<usize>>,
    pub grew: Cell<i32>,
    pub fork_ret: Cell<SysResult>,
    pub wait_ret: Cell<SysResult>,
    pub kill_ret: Cell<SysResult>,
    pub grow_ret: Cell<SysResult>,
    /// 每次 sleep_on 释放锁之后调用，用来编排唤醒脚本
    pub on_sleep: RefCell<Option<Box<dyn FnMut() + 'a>>>,
    /// 每次 yield_cpu 时调用
    pub on_yield: RefCell<Option<Box<dyn FnMut() + 'a>>>,
}

impl<'a> FakeKernel<'a> {
    pub fn new() -> Self {
        Self {
            proc: Cell::new(None),
            cpu: Cell::new(0),
            cr2: Cell::new(0),
            acks: Cell::new(0),
            disk_intrs: Cell::new(0),
            kbd_intrs: Cell::new(0),
            uart_intrs: Cell::new(0),
            flushes: Cell::new(0),
            flushed_root: Cell::new(0),
            wakeups: Cell::new(0),
            wakeup_channel: Cell::new(0),
            sleeps: Cell::new(0),
            yields: Cell::new(0),
            exited: Cell::new(false),
            kills: RefCell::new(Vec::new()),
            grew: Cell::new(0),
            fork_ret: Cell::new(Ok(0)),
            wait_ret: Cell::new(Ok(0)),
            kill_ret: Cell::new(Ok(0)),
            grow_ret: Cell::new(Ok(0)),
            on_sleep: RefCell::new(None),
            on_yield: RefCell::new(None),
        }
    }

    pub fn with_proc(p: &'a Proc) -> Self {
        let k = Self::new();
        k.proc.set(Some(p));
        k
    }
}

impl<'a> Kernel for FakeKernel<'a> {
    fn myproc(&self) -> Option<&Proc> {
        self.proc.get()
    }

    fn cpu_id(&self) -> usize {
        self.cpu.get()
    }

    fn fault_address(&self) -> usize {
        self.cr2.get()
    }

    fn flush_tlb(&self, root: PhysAddr) {
        self.flushes.set(self.flushes.get() + 1);
        self.flushed_root.set(root.as_usize());
    }

    fn ack_intr(&self) {
        self.acks.set(self.acks.get() + 1);
    }

    fn disk_intr(&self) {
        self.disk_intrs.set(self.disk_intrs.get() + 1);
    }

    fn keyboard_intr(&self) {
        self.kbd_intrs.set(self.kbd_intrs.get() + 1);
    }

    fn uart_intr(&self) {
        self.uart_intrs.set(self.uart_intrs.get() + 1);
    }

    fn wakeup(&self, channel: usize) {
        self.wakeups.set(self.wakeups.get() + 1);
        self.wakeup_channel.set(channel);
    }

    fn sleep_on(&self, _channel: usize, guard: SpinLockGuard<'_, Wrapping<usize>>) {
        // 真内核在登记好睡眠通道后释放关联的锁，这里照做
        drop(guard);
        self.sleeps.set(self.sleeps.get() + 1);
        if let Some(hook) = self.on_sleep.borrow_mut().as_mut() {
            hook();
        }
    }

    fn yield_cpu(&self) {
        self.yields.set(self.yields.get() + 1);
        if let Some(hook) = self.on_yield.borrow_mut().as_mut() {
            hook();
        }
    }

    fn exit(&self) -> ! {
        self.exited.set(true);
        panic!("process exit");
    }

    fn fork(&self) -> SysResult {
        self.fork_ret.get()
    }

    fn wait(&self) -> SysResult {
        self.wait_ret.get()
    }

    fn kill(&self, pid: usize) -> SysResult {
        self.kills.borrow_mut().push(pid);
        self.kill_ret.get()
    }

    fn grow(&self, delta: i32) -> SysResult {
        self.grew.set(delta);
        self.grow_ret.get()
    }
}

/// 假页目录：把从 0 开始的若干用户页映射到一段宿主内存上，
/// 页表项真实可改，读写都走和内核一致的检查
pub struct FakePageDir {
    ptes: Vec<(usize, PageTableEntry)>,
    pub mem: Vec<u8>,
    root: usize,
}

impl FakePageDir {
    /// 映射 `pages` 个连续页，权限为存在、可写、用户
    pub fn new(pages: usize) -> Self {
        let mut ptes = Vec::with_capacity(pages);
        for i in 0..pages {
            let mut pte = PageTableEntry::empty();
            // 物理帧任选，页对齐即可
            let pa = PhysAddr::try_from((i + 1) * PGSIZE).unwrap();
            pte.write_perm(pa, PteFlag::W | PteFlag::U);
            ptes.push((i * PGSIZE, pte));
        }
        Self {
            ptes,
            mem: vec![0; pages * PGSIZE],
            root: 0x1000,
        }
    }

    /// 撤销 `va` 所在页的映射
    pub fn unmap(&mut self, va: usize) {
        let base = va & !(PGSIZE - 1);
        self.ptes.retain(|(page, _)| *page != base);
    }

    /// 取某一页的页表项，页必须已映射
    pub fn pte(&self, va: usize) -> &PageTableEntry {
        let base = va & !(PGSIZE - 1);
        self.ptes
            .iter()
            .find(|(page, _)| *page == base)
            .map(|(_, pte)| pte)
            .expect("page not mapped")
    }

    /// 直接向后备内存写一个 u32，绕过权限检查
    pub fn poke_u32(&mut self, addr: usize, val: u32) {
        self.mem[addr..addr + 4].copy_from_slice(&val.to_le_bytes());
    }

    pub fn root_raw(&self) -> usize {
        self.root
    }
}

impl PageDirectory for FakePageDir {
    fn locate(&mut self, va: VirtAddr, _alloc: bool) -> Option<&mut PageTableEntry> {
        let mut page = va;
        page.pg_round_down();
        let base = page.as_usize();
        self.ptes
            .iter_mut()
            .find(|(page, _)| *page == base)
            .map(|(_, pte)| pte)
    }

    fn root(&self) -> PhysAddr {
        PhysAddr::try_from(self.root).unwrap()
    }

    fn copy_in_u32(&self, va: VirtAddr) -> Result<u32, ()> {
        let addr = va.as_usize();
        let mut page = va;
        page.pg_round_down();
        let base = page.as_usize();
        if !self
            .ptes
            .iter()
            .any(|(page, pte)| *page == base && pte.is_present())
        {
            return Err(());
        }
        if addr + 4 > self.mem.len() {
            return Err(());
        }
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.mem[addr..addr + 4]);
        Ok(u32::from_le_bytes(bytes))
    }
}

/// 来自用户态的陷入帧，eip 固定在 0x40
pub fn user_frame(trapno: usize, err: u32) -> TrapFrame {
    let mut tf = TrapFrame::zero();
    tf.trapno = trapno as u32;
    tf.err = err;
    tf.cs = ((SEG_UCODE << 3) | DPL_USER) as u16;
    tf.eip = 0x40;
    tf
}

/// 内核态现场的陷入帧
pub fn kernel_frame(trapno: usize) -> TrapFrame {
    let mut tf = TrapFrame::zero();
    tf.trapno = trapno as u32;
    tf.cs = (SEG_KCODE << 3) as u16;
    tf
}

/// 系统调用陷入帧：调用号在 eax，用户栈顶在 esp
pub fn syscall_frame(num: u32, esp: u32) -> TrapFrame {
    let mut tf = user_frame(T_SYSCALL, 0);
    tf.eax = num;
    tf.esp = esp;
    tf
}

/// 把陷入帧挂到进程上，模拟陷入入口的动作
///
/// # 安全性
/// `tf` 在进程随后的系统调用分发期间必须保持有效
pub unsafe fn attach_tf(p: &Proc, tf: &mut TrapFrame) {
    (*p.data.get()).tf = tf as *mut TrapFrame;
}

/// 模拟用户程序向 `va` 写一个 u32：页可写则直接写入后备内存，
/// 否则触发一次写保护缺页陷入，交给内核处理后回到同一条指令重试。
/// 返回经历的缺页次数。
///
/// # 安全性
/// `dir` 必须就是挂在 `p` 上的页目录，且在调用期间保持有效
pub unsafe fn user_store_u32(
    k: &FakeKernel<'_>,
    p: &Proc,
    dir: *mut FakePageDir,
    va: usize,
    val: u32,
) -> usize {
    let mut faults = 0;
    loop {
        let writable = {
            let dir = &*dir;
            let base = va & !(PGSIZE - 1);
            match dir.ptes.iter().find(|(page, _)| *page == base) {
                Some((_, pte)) => pte.is_writable(),
                None => panic!("store to unmapped page"),
            }
        };
        if writable {
            (&mut (*dir).mem)[va..va + 4].copy_from_slice(&val.to_le_bytes());
            return faults;
        }

        // 硬件在此处陷入：cr2 记下出错地址，进同一条陷入路径
        faults += 1;
        k.cr2.set(va);
        let mut tf = user_frame(T_PGFLT, FEC_WPU);
        trap::trap(k, &mut tf);
        // 被终止的进程不会回到用户态重试
        if p.killed.load(Ordering::Relaxed) {
            panic!("store by killed process");
        }
    }
}

thread_local! {
    static CONSOLE: RefCell<String> = RefCell::new(String::new());
}

fn test_putc(c: u8) {
    CONSOLE.with(|buf| buf.borrow_mut().push(c as char));
}

/// 注册测试控制台并清空当前线程的输出缓冲
pub fn capture_console() {
    console_init(test_putc);
    CONSOLE.with(|buf| buf.borrow_mut().clear());
}

/// 取出当前线程积累的控制台输出
pub fn console_output() -> String {
    CONSOLE.with(|buf| buf.borrow().clone())
}
