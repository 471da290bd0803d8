//! 提供物理地址与虚拟地址包装

use core::convert::TryFrom;
use core::result::Result;

use crate::consts::{PGSIZE, PHYSTOP, MAXVA};

/// 地址类型通用接口
///
/// 定义物理地址和虚拟地址共有的操作方法，
/// 包括页对齐调整、地址转换等。
pub trait Addr {
    /// 获取内部地址值的不可变引用
    fn data_ref(&self) -> &usize;

    /// 获取内部地址值的可变引用
    fn data_mut(&mut self) -> &mut usize;

    /// 向上取整到页边界
    #[inline]
    fn pg_round_up(&mut self) {
        *self.data_mut() = (*self.data_mut() + PGSIZE - 1) & !(PGSIZE - 1)
    }

    /// 向下取整到页边界
    #[inline]
    fn pg_round_down(&mut self) {
        *self.data_mut() = *self.data_mut() & !(PGSIZE - 1)
    }

    /// 增加一页大小（PGSIZE）
    ///
    /// # 注意
    /// 不检查地址是否合法，调用者需确保操作后地址有效
    #[inline]
    fn add_page(&mut self) {
        *self.data_mut() += PGSIZE;
    }

    /// 获取地址的usize表示
    #[inline]
    fn as_usize(&self) -> usize {
        *self.data_ref()
    }
}

/// 物理地址封装类型
///
/// # 合法性保证
/// - 地址必须页对齐（通过`TryFrom`实现检查）
/// - 地址值不超过`PHYSTOP`定义的上限
#[repr(C)]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct PhysAddr(usize);

impl Addr for PhysAddr {
    #[inline]
    fn data_ref(&self) -> &usize {
        &self.0
    }

    #[inline]
    fn data_mut(&mut self) -> &mut usize {
        &mut self.0
    }
}

impl PhysAddr {
    /// 从原始usize值构造物理地址
    ///
    /// # 安全性
    /// 调用者必须保证 `raw` 是合法、页对齐、不超过`PHYSTOP`的物理地址
    #[inline]
    pub unsafe fn from_raw(raw: usize) -> Self {
        Self(raw)
    }
}

impl TryFrom<usize> for PhysAddr {
    type Error = &'static str;

    /// 尝试从usize创建物理地址
    ///
    /// # 检查条件
    /// 1. 地址必须页对齐（`addr % PGSIZE == 0`）
    /// 2. 地址不超过`PHYSTOP`定义的上限
    fn try_from(addr: usize) -> Result<Self, Self::Error> {
        if addr % PGSIZE != 0 {
            return Err("PhysAddr addr not aligned");
        }
        if addr > PHYSTOP {
            return Err("PhysAddr addr bigger than PHYSTOP");
        }
        Ok(PhysAddr(addr))
    }
}

/// 虚拟地址封装类型
///
/// # 合法性保证
/// 用户地址空间位于低半部，
/// 地址值必须低于内核映射起点`MAXVA`（KERNBASE）。
#[repr(C)]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct VirtAddr(usize);

impl Addr for VirtAddr {
    #[inline]
    fn data_ref(&self) -> &usize {
        &self.0
    }

    #[inline]
    fn data_mut(&mut self) -> &mut usize {
        &mut self.0
    }
}

impl TryFrom<usize> for VirtAddr {
    type Error = &'static str;

    /// 尝试从usize创建虚拟地址
    ///
    /// # 检查条件
    /// 地址值必须小于`MAXVA`
    fn try_from(addr: usize) -> Result<Self, Self::Error> {
        if addr >= MAXVA {
            Err("value for VirtAddr should be smaller than KERNBASE")
        } else {
            Ok(Self(addr))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::TryFrom;

    #[test]
    fn virt_addr_bounds() {
        assert!(VirtAddr::try_from(0usize).is_ok());
        assert!(VirtAddr::try_from(MAXVA - 1).is_ok());
        assert!(VirtAddr::try_from(MAXVA).is_err());
    }

    #[test]
    fn phys_addr_alignment() {
        assert!(PhysAddr::try_from(PGSIZE * 3).is_ok());
        assert!(PhysAddr::try_from(PGSIZE * 3 + 7).is_err());
        assert!(PhysAddr::try_from(PHYSTOP + PGSIZE).is_err());
    }

    #[test]
    fn page_rounding() {
        let mut va = VirtAddr::try_from(PGSIZE + 123).unwrap();
        va.pg_round_down();
        assert_eq!(va.as_usize(), PGSIZE);
        let mut va = VirtAddr::try_from(PGSIZE + 123).unwrap();
        va.pg_round_up();
        assert_eq!(va.as_usize(), PGSIZE * 2);
        va.add_page();
        assert_eq!(va.as_usize(), PGSIZE * 3);
    }
}
