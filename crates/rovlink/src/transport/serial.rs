//! Raw-mode serial port driven by the tokio reactor.
//!
//! The tty is opened non-blocking, configured through termios (raw, 8N1, optional
//! RTS/CTS) and registered with [`AsyncFd`]. Split it with [`tokio::io::split`] to get
//! the reader and writer the bridge expects.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use nix::fcntl::OFlag;
use nix::sys::termios::{
    self, BaudRate, ControlFlags, FlushArg, SetArg, SpecialCharacterIndices,
};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::config::BridgeConfig;

/// Line settings applied when the port is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialSettings {
    pub baud_rate: u32,
    /// Hardware flow control.
    pub rtscts: bool,
}

impl SerialSettings {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            baud_rate: config.baud_rate,
            rtscts: config.rtscts,
        }
    }
}

#[derive(Debug)]
pub struct SerialPort {
    fd: AsyncFd<File>,
}

impl SerialPort {
    /// Open and configure `path`. Must be called inside a tokio runtime.
    pub fn open(path: impl AsRef<Path>, settings: &SerialSettings) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags((OFlag::O_NOCTTY | OFlag::O_NONBLOCK).bits())
            .open(path)?;

        configure(&file, settings)?;
        tracing::info!(
            device = %path.display(),
            baud_rate = settings.baud_rate,
            rtscts = settings.rtscts,
            "Opened serial port"
        );

        Ok(Self {
            fd: AsyncFd::new(file)?,
        })
    }
}

fn configure(file: &File, settings: &SerialSettings) -> io::Result<()> {
    let mut tty = termios::tcgetattr(file)?;

    termios::cfmakeraw(&mut tty);
    termios::cfsetspeed(&mut tty, baud_rate(settings.baud_rate)?)?;

    tty.control_flags |= ControlFlags::CLOCAL | ControlFlags::CREAD;
    tty.control_flags &= !(ControlFlags::CSTOPB | ControlFlags::PARENB);
    #[cfg(any(target_os = "linux", target_os = "android"))]
    tty.control_flags.set(ControlFlags::CRTSCTS, settings.rtscts);
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    if settings.rtscts {
        tracing::warn!("RTS/CTS flow control is not supported on this platform");
    }

    tty.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
    tty.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

    termios::tcsetattr(file, SetArg::TCSANOW, &tty)?;
    // Drop anything the line buffered before we owned it.
    termios::tcflush(file, FlushArg::TCIOFLUSH)?;
    Ok(())
}

fn baud_rate(rate: u32) -> io::Result<BaudRate> {
    let baud = match rate {
        9_600 => BaudRate::B9600,
        19_200 => BaudRate::B19200,
        38_400 => BaudRate::B38400,
        57_600 => BaudRate::B57600,
        115_200 => BaudRate::B115200,
        230_400 => BaudRate::B230400,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        460_800 => BaudRate::B460800,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        500_000 => BaudRate::B500000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        576_000 => BaudRate::B576000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        921_600 => BaudRate::B921600,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        1_000_000 => BaudRate::B1000000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        1_152_000 => BaudRate::B1152000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        1_500_000 => BaudRate::B1500000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        2_000_000 => BaudRate::B2000000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        2_500_000 => BaudRate::B2500000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        3_000_000 => BaudRate::B3000000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        3_500_000 => BaudRate::B3500000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        4_000_000 => BaudRate::B4000000,
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported baud rate {other}"),
            ));
        }
    };
    Ok(baud)
}

impl AsyncRead for SerialPort {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = ready!(self.fd.poll_read_ready(cx))?;

            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| inner.get_ref().read(unfilled)) {
                Ok(Ok(len)) => {
                    buf.advance(len);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsyncWrite for SerialPort {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = ready!(self.fd.poll_write_ready(cx))?;

            match guard.try_io(|inner| inner.get_ref().write(buf)) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }

    // Written bytes sit in the kernel tty buffer; there is nothing to flush here.
    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
