use std::fmt;

/// Status code returned by the Bluetooth host stack
///
/// A zero status means success and is never wrapped in a `StackError`; every other value is a
/// failure reported by a stack call or carried by a completed GATT procedure.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct StackError(u16);

impl StackError {
    /// Wrap a raw status code
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// The raw status code
    pub const fn code(self) -> u16 {
        self.0
    }

    /// Convert a raw status into a `Result`, treating zero as success
    pub fn check(code: u16) -> Result<(), Self> {
        match code {
            0 => Ok(()),
            x => Err(Self(x)),
        }
    }
}

impl From<StackError> for u16 {
    fn from(x: StackError) -> u16 {
        x.0
    }
}

impl std::error::Error for StackError {}

macro_rules! errors {
    {$($name:ident($val:expr) $desc:expr;)*} => {
        impl StackError {
            $(#[doc = $desc] pub const $name: Self = StackError($val);)*
        }

        impl fmt::Debug for StackError {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.0 {
                    $($val => f.write_str(stringify!($name)),)*
                    x if (0x1100..0x1200).contains(&x) => write!(f, "StackError::att({:#04x})", x & 0xff),
                    _ => write!(f, "StackError({:#06x})", self.0),
                }
            }
        }

        impl fmt::Display for StackError {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let x = match self.0 {
                    $($val => $desc,)*
                    x if (0x1100..0x1200).contains(&x) => "the peer returned an attribute protocol error",
                    _ => "unknown stack error",
                };
                f.write_str(x)
            }
        }
    }
}

errors! {
    FAILED(0x0001) "the operation failed without a more specific reason";
    INVALID_PARAMETER(0x0021) "a parameter was out of range or not supported by the stack";
    INVALID_STATE(0x0002) "the stack is not in a state that permits the operation";
    NO_MORE_RESOURCES(0x0009) "the stack ran out of buffers or queue space; retry later";
    NOT_FOUND(0x0005) "the requested item does not exist";
    TIMEOUT(0x0007) "the operation timed out";
    NOT_SUPPORTED(0x000f) "the operation is not supported by the stack or the peer";
    CONNECTION_TERMINATED(0x1016) "the connection was terminated by the local host";
    REMOTE_USER_TERMINATED(0x1013) "the connection was terminated by the remote user";
    ATT_INVALID_HANDLE(0x1101) "the attribute handle given was not valid on the peer";
    ATT_WRITE_NOT_PERMITTED(0x1103) "the attribute cannot be written";
    ATT_ATTRIBUTE_NOT_FOUND(0x110a) "no attribute found within the given handle range";
}

impl StackError {
    /// Wrap an attribute protocol error code reported by the peer
    pub const fn att(code: u8) -> Self {
        Self(0x1100 | code as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_maps_zero_to_ok() {
        assert_eq!(StackError::check(0), Ok(()));
        assert_eq!(
            StackError::check(0x0009),
            Err(StackError::NO_MORE_RESOURCES)
        );
    }

    #[test]
    fn formatting() {
        assert_eq!(
            format!("{:?}", StackError::INVALID_PARAMETER),
            "INVALID_PARAMETER"
        );
        assert_eq!(format!("{:?}", StackError::att(0x0e)), "StackError::att(0x0e)");
        assert_eq!(format!("{:?}", StackError::new(0x0444)), "StackError(0x0444)");
        assert_eq!(StackError::new(0x0444).to_string(), "unknown stack error");
        assert_eq!(
            StackError::ATT_INVALID_HANDLE.to_string(),
            "the attribute handle given was not valid on the peer"
        );
    }
}
