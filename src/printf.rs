//! 定义系统内核的输出方法

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::spinlock::SpinLock;

/// 全局 panic 状态标志，置位后打印不再加锁
pub static PANICKED: AtomicBool = AtomicBool::new(false);

/// 控制台单字节输出函数，由外层内核在启动时注册。
/// 以 usize 形式存放函数指针，0 表示尚未注册，输出被丢弃。
static PUTC: AtomicUsize = AtomicUsize::new(0);

/// 注册控制台输出函数，必须在需要任何内核输出之前调用一次。
pub fn console_init(putc: fn(u8)) {
    PUTC.store(putc as usize, Ordering::Release);
}

/// 零大小类型（ZST）的打印结构体，用于在多个 CPU 之间对打印操作进行排序。
struct Print;

impl Print {
    /// 向控制台输出单个字符
    fn print(&self, c: u8) {
        let raw = PUTC.load(Ordering::Acquire);
        if raw != 0 {
            // 只有 console_init 以真实的 fn(u8) 写入过 PUTC
            let putc: fn(u8) = unsafe { core::mem::transmute(raw) };
            putc(c);
        }
    }
}

impl fmt::Write for Print {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.print(byte);
        }
        Ok(())
    }
}

/// 核心打印函数（被宏调用）
///
/// # 功能说明
/// 根据系统状态决定是否加锁输出：
/// - 当系统处于panic状态时，直接输出（不加锁）
/// - 正常状态下使用自旋锁保证多核输出同步
///
/// # 注意
/// 此函数被声明为pub，因为需要在宏中调用
pub fn _print(args: fmt::Arguments<'_>) {
    use fmt::Write;
    static PRINT: SpinLock<()> = SpinLock::new((), "print");

    if PANICKED.load(Ordering::Relaxed) {
        // no need to lock
        Print.write_fmt(args).expect("_print: error");
    } else {
        let guard = PRINT.lock();
        Print.write_fmt(args).expect("_print: error");
        drop(guard);
    }
}

/// 在终端输出一串字符
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::printf::_print(format_args!($($arg)*));
    };
}

/// 在终端输出一行字符
#[macro_export]
macro_rules! println {
    () => {$crate::print!("\n")};
    ($fmt:expr) => {$crate::print!(concat!($fmt, "\n"))};
    ($fmt:expr, $($arg:tt)*) => {
        $crate::print!(concat!($fmt, "\n"), $($arg)*)
    };
}

/// 全局panic处理函数
///
/// # 功能说明
/// 1. 打印panic信息
/// 2. 设置全局panic状态标志
/// 3. 挂起系统（无限循环）
#[cfg(not(test))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    crate::println!("{}", info);
    PANICKED.store(true, Ordering::Relaxed);
    loop {}
}

/// 单元测试模块
#[cfg(all(feature = "unit_test", not(test)))]
pub mod tests {
    use crate::process::cpu;

    /// 多核同步打印测试：每个核心连续输出10行带核心ID的信息
    pub fn println_simo() {
        let cpu_id = cpu::cpu_id();
        for i in 0..10 {
            println!("println_mul_hart{}: hart {}", i, cpu_id);
        }
    }
}
