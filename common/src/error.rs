use core::fmt;
use std::error::Error;

/// 携带源码位置的错误信息。
#[derive(Clone, PartialEq, Eq)]
pub struct ErrorPosition {
    file: &'static str,
    line: u32,
    message: String,
}

impl Error for ErrorPosition {}

impl ErrorPosition {
    #[inline]
    pub const fn new(file: &'static str, line: u32, message: String) -> Self {
        Self {
            file,
            line,
            message,
        }
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for ErrorPosition {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}: {:?}", self.file, self.line, self.message)
    }
}

impl fmt::Display for ErrorPosition {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}: \"{}\"", self.file, self.line, self.message)
    }
}

#[macro_export]
macro_rules! locate_error {
    ($msg:expr) => {
        $crate::ErrorPosition::new(file!(), line!(), $msg.to_string())
    };
    () => {
        $crate::locate_error!("Error occurred")
    };
}

#[test]
fn test_locate_error() {
    fn error() -> ErrorPosition {
        locate_error!("cudaMalloc failed")
    }
    let e = error();
    assert_eq!(e.message(), "cudaMalloc failed");
    assert!(e.to_string().starts_with(file!()));
    assert_eq!(locate_error!().message(), "Error occurred");
}
