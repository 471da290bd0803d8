//! 内存管理模块
//! 页表的分配与映射由外层内核负责，这里只保留地址包装、
//! 页表项抽象和页目录接口。

pub use addr::{Addr, PhysAddr, VirtAddr};
pub use pagetable::{PageDirectory, PageTableEntry, PteFlag};

mod addr;
mod pagetable;
