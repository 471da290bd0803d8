//! 崩溃诊断模块，打印陷入现场的通用寄存器和用户调用栈

use core::mem::size_of;
use core::ptr;

use crate::consts::{MAX_BACKTRACE, STACK_SENTINEL};
use crate::process::TrapFrame;

/// 打印崩溃现场信息：先逐行输出陷入帧中的通用寄存器，
/// 再沿 ebp 链回溯用户调用栈。
///
/// # 功能说明
/// 当进程触发无法处理的陷入时，内核调用本函数输出诊断信息，
/// 供开发者定位用户程序的崩溃位置。输出分为两段：
/// 第一段按 eax、ebx、ecx、edx、esi、edi、esp、ebp、eip 的顺序
/// 打印陷入瞬间的寄存器快照；第二段从陷入帧记录的 ebp 出发，
/// 逐帧打印返回地址，直到遇到栈底哨兵值。
///
/// # 参数
/// - `tf`: 引发诊断的陷入帧
///
/// # 返回值
/// 无
///
/// # 可能的错误
/// 无显式错误。若 ebp 链被破坏，回溯会在深度上限或空帧指针处截断，
/// 不会越过上限继续读取。
///
/// # 安全性
/// 回溯部分按帧指针读取裸内存，安全契约见 [`stack_trace`]。
/// 陷入帧由陷入入口填写，其中 ebp 要么是进程真实的帧指针，
/// 要么为 0（此时回溯直接结束），满足该契约。
pub fn print_crash_info(tf: &TrapFrame) {
    println!("eax:0x{:x}", tf.eax);
    println!("ebx:0x{:x}", tf.ebx);
    println!("ecx:0x{:x}", tf.ecx);
    println!("edx:0x{:x}", tf.edx);
    println!("esi:0x{:x}", tf.esi);
    println!("edi:0x{:x}", tf.edi);
    println!("esp:0x{:x}", tf.esp);
    println!("ebp:0x{:x}", tf.ebp);
    println!("eip:0x{:x}", tf.eip);
    unsafe {
        stack_trace(tf.ebp as usize, MAX_BACKTRACE);
    }
}

/// 沿帧指针链回溯调用栈，每帧打印一行 `#深度\t0x返回地址`。
///
/// # 功能说明
/// 每个栈帧的布局为：帧指针处存放上一帧的帧指针，
/// 帧指针加一个字长处存放返回地址。从 `fp` 出发逐帧读取并打印，
/// 满足下列任一条件时停止：
/// - 打印的返回地址等于栈底哨兵值 [`STACK_SENTINEL`]；
/// - 下一帧指针为 0；
/// - 已打印 `max_frames` 帧。
///
/// # 参数
/// - `fp`: 起始帧指针，为 0 时直接返回
/// - `max_frames`: 最多打印的帧数
///
/// # 返回值
/// 无
///
/// # 安全性
/// 调用者必须保证 `fp` 为 0，或指向一条可读的帧链：
/// 链上每个非零帧指针处的两个字都在当前地址空间内可读。
/// 链本身不要求以哨兵收尾，深度上限保证回溯总会终止。
pub unsafe fn stack_trace(mut fp: usize, max_frames: usize) {
    for depth in 0..max_frames {
        if fp == 0 {
            break;
        }
        let ret = ptr::read((fp + size_of::<usize>()) as *const usize);
        println!("#{}\t0x{:x}", depth, ret);
        if ret == STACK_SENTINEL {
            break;
        }
        fp = ptr::read(fp as *const usize);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{capture_console, console_output};
    use crate::process::TrapFrame;

    /// 在宿主栈上搭一条帧链：每帧两个字，也就是 [上一帧指针, 返回地址]。
    /// `frames[0]` 是最外层帧，链以哨兵返回地址收尾。
    fn build_chain(rets: &[usize], frames: &mut Vec<[usize; 2]>) -> usize {
        assert!(!rets.is_empty());
        frames.clear();
        frames.reserve(rets.len());
        for &ret in rets {
            frames.push([0, ret]);
        }
        for i in 0..frames.len() - 1 {
            let next = &frames[i + 1] as *const [usize; 2] as usize;
            frames[i][0] = next;
        }
        &frames[0] as *const [usize; 2] as usize
    }

    #[test]
    fn trace_stops_at_sentinel() {
        let mut frames = Vec::new();
        let fp = build_chain(&[0x401000, 0x402000, STACK_SENTINEL], &mut frames);
        capture_console();
        unsafe { stack_trace(fp, MAX_BACKTRACE) };
        let out = console_output();
        assert!(out.contains("#0\t0x401000"));
        assert!(out.contains("#1\t0x402000"));
        assert!(out.contains(&format!("#2\t0x{:x}", STACK_SENTINEL)));
        assert!(!out.contains("#3"));
    }

    #[test]
    fn trace_stops_at_null_frame_pointer() {
        let mut frames = Vec::new();
        // 链断在第二帧之后：下一帧指针为 0，没有哨兵
        let fp = build_chain(&[0x401000, 0x402000], &mut frames);
        frames[1][0] = 0;
        capture_console();
        unsafe { stack_trace(fp, MAX_BACKTRACE) };
        let out = console_output();
        assert!(out.contains("#0\t0x401000"));
        assert!(out.contains("#1\t0x402000"));
        assert!(!out.contains("#2"));
    }

    #[test]
    fn trace_respects_depth_limit() {
        // 自环的帧链永远走不到哨兵，上限必须兜底
        let mut frame = [0usize, 0xdead];
        let fp = &mut frame as *mut [usize; 2] as usize;
        frame[0] = fp;
        capture_console();
        unsafe { stack_trace(fp, MAX_BACKTRACE) };
        let out = console_output();
        assert!(out.contains(&format!("#{}\t0xdead", MAX_BACKTRACE - 1)));
        assert!(!out.contains(&format!("#{}", MAX_BACKTRACE)));
    }

    #[test]
    fn trace_with_null_fp_prints_nothing() {
        capture_console();
        unsafe { stack_trace(0, MAX_BACKTRACE) };
        assert!(console_output().is_empty());
    }

    #[test]
    fn crash_info_prints_registers_and_real_eip() {
        let mut tf = TrapFrame::zero();
        tf.eax = 0x11;
        tf.ebx = 0x22;
        tf.ecx = 0x33;
        tf.edx = 0x44;
        tf.esi = 0x55;
        tf.edi = 0x66;
        tf.esp = 0x7fff;
        tf.ebp = 0;
        tf.eip = 0x8048123;
        capture_console();
        print_crash_info(&tf);
        let out = console_output();
        assert!(out.contains("eax:0x11"));
        assert!(out.contains("ebx:0x22"));
        assert!(out.contains("ecx:0x33"));
        assert!(out.contains("edx:0x44"));
        assert!(out.contains("esi:0x55"));
        assert!(out.contains("edi:0x66"));
        assert!(out.contains("esp:0x7fff"));
        assert!(out.contains("ebp:0x0"));
        // eip 打印陷入帧里真正的 eip，而不是某个别的寄存器
        assert!(out.contains("eip:0x8048123"));
        assert!(!out.contains("eip:0x66"));
    }
}
