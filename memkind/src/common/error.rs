use memkind_common::ErrorPosition;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NegotiationErrorKind {
    /// 消息传递运行时无法启动。
    FatalStartup,
    /// 运行时拒绝创建断言该种类的通信器。
    AssertionRejected,
    /// 本地设备运行时不支持该种类。
    UnsupportedDeviceRuntime,
    /// 设备分配、拷贝或同步失败。
    DeviceOperationFailure,
    /// 并非所有参与者都支持该种类。
    GroupDisagreement,
    ArgsNotSupport,
    FileOperationFailure,
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("{kind:?}: {info}")]
pub struct NegotiationError {
    pub kind: NegotiationErrorKind,
    pub info: String,
}

impl NegotiationError {
    /// 可恢复的错误只导致回退到下一个候选种类。
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        use NegotiationErrorKind::*;
        matches!(
            self.kind,
            AssertionRejected | UnsupportedDeviceRuntime | GroupDisagreement
        )
    }
}

impl From<ErrorPosition> for NegotiationError {
    #[inline]
    fn from(e: ErrorPosition) -> Self {
        functions::device_operation_failure(e.to_string())
    }
}

pub(super) mod functions {
    use super::{NegotiationError, NegotiationErrorKind::*};

    macro_rules! builder {
        ($ty:ident: $name:ident $kind:expr) => {
            #[inline]
            pub fn $name(info: impl Into<String>) -> $ty {
                $ty {
                    kind: $kind,
                    info: info.into(),
                }
            }
        };
    }

    builder!(NegotiationError: fatal_startup              FatalStartup            );
    builder!(NegotiationError: assertion_rejected         AssertionRejected       );
    builder!(NegotiationError: unsupported_device_runtime UnsupportedDeviceRuntime);
    builder!(NegotiationError: device_operation_failure   DeviceOperationFailure  );
    builder!(NegotiationError: group_disagreement         GroupDisagreement       );
    builder!(NegotiationError: args_not_support           ArgsNotSupport          );
    builder!(NegotiationError: file_operation_failure     FileOperationFailure    );
}

#[test]
fn test_recoverable() {
    use functions::*;
    use memkind_common::locate_error;

    assert!(assertion_rejected("").is_recoverable());
    assert!(unsupported_device_runtime("").is_recoverable());
    assert!(group_disagreement("").is_recoverable());
    assert!(!fatal_startup("").is_recoverable());

    let e = NegotiationError::from(locate_error!("cudaStreamSynchronize failed"));
    assert_eq!(e.kind, NegotiationErrorKind::DeviceOperationFailure);
    assert!(!e.is_recoverable());
    assert!(e.to_string().starts_with("DeviceOperationFailure: "));
}
