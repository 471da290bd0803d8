//! 陷阱帧模块，保存陷入内核瞬间的处理器状态

use crate::consts::DPL_USER;

/// x86 陷入内核时由硬件和入口桩保存的完整处理器状态。
///
/// 字段顺序与压栈布局严格一致，偏移注释以字节为单位。
/// 恢复现场时除被显式修复的字段外必须逐字节还原，
/// 否则进程只能被终止。
#[repr(C)]
pub struct TrapFrame {
    // pusha 压入的通用寄存器
    /*   0 */ pub edi: u32,
    /*   4 */ pub esi: u32,
    /*   8 */ pub ebp: u32,
    /*  12 */ pub oesp: u32, // useless & ignored
    /*  16 */ pub ebx: u32,
    /*  20 */ pub edx: u32,
    /*  24 */ pub ecx: u32,
    /*  28 */ pub eax: u32,

    // 入口桩压入的段寄存器
    /*  32 */ pub gs: u16,
    /*  34 */ pub padding1: u16,
    /*  36 */ pub fs: u16,
    /*  38 */ pub padding2: u16,
    /*  40 */ pub es: u16,
    /*  42 */ pub padding3: u16,
    /*  44 */ pub ds: u16,
    /*  46 */ pub padding4: u16,
    /*  48 */ pub trapno: u32,

    // 以下由 x86 硬件在陷入时压栈
    /*  52 */ pub err: u32,
    /*  56 */ pub eip: u32,
    /*  60 */ pub cs: u16,
    /*  62 */ pub padding5: u16,
    /*  64 */ pub eflags: u32,

    // 以下仅在特权级切换时由硬件压栈
    /*  68 */ pub esp: u32,
    /*  72 */ pub ss: u16,
    /*  74 */ pub padding6: u16,
}

impl TrapFrame {
    /// 全零陷阱帧，供测试与初始化使用
    pub const fn zero() -> Self {
        Self {
            edi: 0,
            esi: 0,
            ebp: 0,
            oesp: 0,
            ebx: 0,
            edx: 0,
            ecx: 0,
            eax: 0,
            gs: 0,
            padding1: 0,
            fs: 0,
            padding2: 0,
            es: 0,
            padding3: 0,
            ds: 0,
            padding4: 0,
            trapno: 0,
            err: 0,
            eip: 0,
            cs: 0,
            padding5: 0,
            eflags: 0,
            esp: 0,
            ss: 0,
            padding6: 0,
        }
    }

    /// 陷入是否来自用户态，cs 低两位是当时的特权级
    #[inline]
    pub fn from_user(&self) -> bool {
        (self.cs & 3) as usize == DPL_USER
    }
}
