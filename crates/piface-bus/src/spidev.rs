//! Linux spidev 总线后端
//!
//! 通过 `/dev/spidevB.C` 的字符设备接口驱动 SPI 控制器。
//!
//! ## 配置
//!
//! - SPI 模式 3（上升沿采样，空闲高）——扩展芯片的要求
//! - 时钟 10 MHz（芯片上限）
//! - 8 位字长
//!
//! ## 限制
//!
//! - **仅限 Linux 平台**：spidev 是 Linux 内核特性
//! - **权限要求**：设备节点通常属于 `spi` 组，可能需要相应组权限
//! - 内核需启用 `spidev` 并在设备树中暴露对应片选

use crate::{BusDeviceError, BusDeviceErrorKind, BusError, SpiTransport};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use tracing::{info, trace};

/// SPI 模式 3：CPOL=1, CPHA=1
const SPI_MODE_3: u8 = 0x03;
/// 扩展芯片的最高时钟频率
const SPI_CLOCK_HZ: u32 = 10_000_000;
const SPI_BITS_PER_WORD: u8 = 8;

// spidev 的 ioctl 请求号（_IOW('k', nr, size)，见 linux/spi/spidev.h）
const SPI_IOC_WR_MODE: u32 = 0x4001_6B01;
const SPI_IOC_WR_BITS_PER_WORD: u32 = 0x4001_6B03;
const SPI_IOC_WR_MAX_SPEED_HZ: u32 = 0x4004_6B04;

/// struct spi_ioc_transfer 的 ABI 镜像（固定 32 字节）
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct SpiIocTransfer {
    tx_buf: u64,
    rx_buf: u64,
    len: u32,
    speed_hz: u32,
    delay_usecs: u16,
    bits_per_word: u8,
    cs_change: u8,
    tx_nbits: u8,
    rx_nbits: u8,
    word_delay_usecs: u8,
    pad: u8,
}

/// SPI_IOC_MESSAGE(n)：一次提交 n 段传输
const fn spi_ioc_message(n: usize) -> u32 {
    0x4000_6B00 | ((((n * std::mem::size_of::<SpiIocTransfer>()) & 0x3FFF) as u32) << 16)
}

/// spidev 总线适配器
///
/// # 示例
///
/// ```no_run
/// use piface_bus::{SpidevBus, SpiTransport};
///
/// let mut bus = SpidevBus::open("/dev/spidev0.0").unwrap();
/// bus.write(&[0x40, 0x12, 0x00]).unwrap();
/// ```
#[derive(Debug)]
pub struct SpidevBus {
    file: File,
    path: String,
}

impl SpidevBus {
    /// 打开并配置一个 spidev 设备节点
    ///
    /// # 错误
    /// - `BusError::Device`：设备不存在、无权限或配置 ioctl 被拒绝
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BusError> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path).map_err(|e| {
            let kind = match e.kind() {
                std::io::ErrorKind::NotFound => BusDeviceErrorKind::NotFound,
                std::io::ErrorKind::PermissionDenied => BusDeviceErrorKind::AccessDenied,
                _ => BusDeviceErrorKind::Backend,
            };
            BusError::Device(BusDeviceError::new(
                kind,
                format!("failed to open SPI device '{}': {}", path.display(), e),
            ))
        })?;

        let fd = file.as_raw_fd();
        set_config(fd, SPI_IOC_WR_MODE, &SPI_MODE_3 as *const u8, "mode")?;
        set_config(
            fd,
            SPI_IOC_WR_BITS_PER_WORD,
            &SPI_BITS_PER_WORD as *const u8,
            "bits per word",
        )?;
        set_config(
            fd,
            SPI_IOC_WR_MAX_SPEED_HZ,
            &SPI_CLOCK_HZ as *const u32 as *const u8,
            "max speed",
        )?;

        info!(
            "SPI device '{}' configured: mode 3, {} Hz, {} bits",
            path.display(),
            SPI_CLOCK_HZ,
            SPI_BITS_PER_WORD
        );

        Ok(Self {
            file,
            path: path.display().to_string(),
        })
    }

    /// 设备节点路径（用于日志）
    pub fn path(&self) -> &str {
        &self.path
    }
}

fn set_config(fd: i32, request: u32, value: *const u8, what: &str) -> Result<(), BusError> {
    let ret = unsafe { libc::ioctl(fd, request as _, value) };
    if ret < 0 {
        let err = std::io::Error::last_os_error();
        return Err(BusError::Device(BusDeviceError::new(
            BusDeviceErrorKind::UnsupportedConfig,
            format!("failed to set SPI {}: {}", what, err),
        )));
    }
    Ok(())
}

impl SpiTransport for SpidevBus {
    fn write(&mut self, buf: &[u8]) -> Result<(), BusError> {
        trace!("spi write: {:02X?}", buf);
        self.file.write_all(buf)?;
        Ok(())
    }

    fn transfer_sequential(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), BusError> {
        // cs_change=0：两段之间片选保持有效，整体是一次连续事务
        let mut xfers = [SpiIocTransfer::default(); 2];
        xfers[0].tx_buf = tx.as_ptr() as u64;
        xfers[0].len = tx.len() as u32;
        xfers[1].rx_buf = rx.as_mut_ptr() as u64;
        xfers[1].len = rx.len() as u32;

        let ret = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                spi_ioc_message(2) as _,
                xfers.as_mut_ptr(),
            )
        };
        if ret < 0 {
            return Err(BusError::Io(std::io::Error::last_os_error()));
        }
        trace!("spi transfer: tx {:02X?} -> rx {:02X?}", tx, rx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_struct_abi_size() {
        // 必须和内核的 struct spi_ioc_transfer 一致，否则 SPI_IOC_MESSAGE 请求号错位
        assert_eq!(std::mem::size_of::<SpiIocTransfer>(), 32);
    }

    #[test]
    fn test_message_request_number() {
        // _IOW('k', 0, char[64])
        assert_eq!(spi_ioc_message(2), 0x4040_6B00);
    }
}
