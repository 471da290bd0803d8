//! 页表项与页目录接口

use super::{Addr, PhysAddr, VirtAddr};

bitflags! {
    /// 内存页表项权限标志（Page Table Entry Flags）
    ///
    /// x86 保护模式下页表项的权限与状态标志，
    /// 用于控制虚拟内存页的访问权限和管理信息。
    /// 本内核只翻转写权限位，映射关系与其余标志一律不动。
    pub struct PteFlag: u32 {
        /// 存在位（Present）
        /// 标记该页表项是否有效，若无效则访问触发页错误。
        const P = 1 << 0;

        /// 写权限（Writable）
        /// 允许访问该页进行写入操作。
        const W = 1 << 1;

        /// 用户态访问权限（User）
        /// 允许用户模式访问该页。
        const U = 1 << 2;

        /// 写直达（Write-Through）
        const PWT = 1 << 3;

        /// 禁用缓存（Cache-Disable）
        const PCD = 1 << 4;

        /// 访问位（Accessed）
        /// CPU硬件设置，表示该页曾被访问过。
        const A = 1 << 5;

        /// 脏位（Dirty）
        /// CPU硬件设置，表示该页曾被写入。
        const D = 1 << 6;

        /// 大页位（Page Size）
        const PS = 1 << 7;
    }
}

/// 页表项结构体（PageTableEntry）
///
/// 封装单个 x86 页表项的原始数据：高 20 位为物理页帧号，
/// 低 12 位为权限标志。所有对权限位的修改都必须经过这里，
/// 其他模块不直接操作裸位。
#[repr(C)]
#[derive(Debug)]
pub struct PageTableEntry {
    data: u32,
}

impl PageTableEntry {
    /// 全零页表项，表示无映射
    pub const fn empty() -> Self {
        Self { data: 0 }
    }

    #[inline]
    pub fn is_present(&self) -> bool {
        (self.data & PteFlag::P.bits()) > 0
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        (self.data & PteFlag::W.bits()) > 0
    }

    #[inline]
    pub fn is_user(&self) -> bool {
        (self.data & PteFlag::U.bits()) > 0
    }

    /// 恢复写权限，其余位保持不变
    #[inline]
    pub fn set_writable(&mut self) {
        self.data |= PteFlag::W.bits()
    }

    /// 撤销写权限，其余位保持不变
    #[inline]
    pub fn clear_writable(&mut self) {
        self.data = (self.data | PteFlag::W.bits()) ^ PteFlag::W.bits()
    }

    /// 取出页表项映射的物理页帧首地址
    #[inline]
    pub fn as_phys_addr(&self) -> PhysAddr {
        unsafe { PhysAddr::from_raw((self.data & !0xfff) as usize) }
    }

    /// 写入映射：物理页帧号加上给定权限，存在位始终置位
    #[inline]
    pub fn write_perm(&mut self, pa: PhysAddr, perm: PteFlag) {
        self.data = (pa.as_usize() as u32 & !0xfff) | (perm | PteFlag::P).bits()
    }

    #[inline]
    pub fn read_perm(&self) -> PteFlag {
        PteFlag::from_bits_truncate(self.data)
    }
}

/// 页目录接口
///
/// 页表的分配、映射与遍历由外层内核负责，
/// 本 crate 只通过这个接口定位页表项、取页目录根地址、
/// 以及按字读取用户内存。
pub trait PageDirectory {
    /// # 功能说明
    /// 定位虚拟地址 `va` 所在页对应的页表项。
    ///
    /// # 参数
    /// - `va`: 目标虚拟地址；
    /// - `alloc`: 中间页表缺失时是否分配。
    ///
    /// # 返回值
    /// - `Some(&mut PageTableEntry)`: 找到（或按需新建）的页表项；
    /// - `None`: 页表项不存在且未要求分配，或分配失败。
    fn locate(&mut self, va: VirtAddr, alloc: bool) -> Option<&mut PageTableEntry>;

    /// 页目录根的物理地址，刷新 TLB 时作为参数使用
    fn root(&self) -> PhysAddr;

    /// 从用户地址空间读取一个 32 位字，`va` 未映射时返回错误
    fn copy_in_u32(&self, va: VirtAddr) -> Result<u32, ()>;
}
