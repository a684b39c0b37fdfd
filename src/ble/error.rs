use thiserror::Error;

use super::hex::HexError;

/// Host error codes surfaced as text by some platform stacks.
const ATT_WRITE_NOT_PERMITTED: &str = "0x80650003";
const ATT_INVALID_PDU: &str = "0x80650004";
const ACCESS_DENIED: &str = "0x80070005";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no Bluetooth adapter available")]
    NoAdapter,
    #[error("device {0} not found")]
    NotFound(String),
    #[error("device {id} unreachable: {reason}")]
    Unreachable { id: String, reason: String },
    #[error("access not granted: {0}")]
    AccessDenied(String),
    #[error("communication error: {0}")]
    Communication(String),
    #[error("restricted service: {0}")]
    Restricted(String),
    #[error(transparent)]
    Ble(#[from] btleplug::Error),
}

impl TransportError {
    /// Maps a stack error raised while enumerating characteristics.
    pub fn from_enumeration(err: btleplug::Error) -> Self {
        match err {
            btleplug::Error::PermissionDenied => Self::AccessDenied(err.to_string()),
            btleplug::Error::NotSupported(reason) => Self::Restricted(reason),
            other => Self::Communication(other.to_string()),
        }
    }
}

/// Why a single write did not land. None of these stop the control loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteFailure {
    /// The remote rejected this specific payload.
    #[error("invalid PDU: {0}")]
    InvalidPdu(String),
    /// The characteristic claims to be writable but the host refuses.
    #[error("write not permitted: {0}")]
    NotPermitted(String),
    #[error("malformed payload: {0}")]
    Payload(#[from] HexError),
    #[error("{0}")]
    Communication(String),
}

impl WriteFailure {
    pub fn is_rejection(&self) -> bool {
        !matches!(self, WriteFailure::Communication(_))
    }
}

pub fn classify_write_error(err: &btleplug::Error) -> WriteFailure {
    if let btleplug::Error::PermissionDenied = err {
        return WriteFailure::NotPermitted(err.to_string());
    }

    let message = err.to_string();
    let lowered = message.to_lowercase();
    if lowered.contains("invalid pdu") || lowered.contains(ATT_INVALID_PDU) {
        WriteFailure::InvalidPdu(message)
    } else if lowered.contains("not permitted")
        || lowered.contains("access denied")
        || lowered.contains("notpermitted")
        || lowered.contains(ATT_WRITE_NOT_PERMITTED)
        || lowered.contains(ACCESS_DENIED)
    {
        WriteFailure::NotPermitted(message)
    } else {
        WriteFailure::Communication(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn other(msg: &str) -> btleplug::Error {
        btleplug::Error::Other(msg.into())
    }

    #[test]
    fn permission_denied_is_not_permitted() {
        assert!(matches!(
            classify_write_error(&btleplug::Error::PermissionDenied),
            WriteFailure::NotPermitted(_)
        ));
    }

    #[test]
    fn recognises_att_invalid_pdu() {
        assert!(matches!(
            classify_write_error(&other("ATT error: Invalid PDU")),
            WriteFailure::InvalidPdu(_)
        ));
        assert!(matches!(
            classify_write_error(&other("HRESULT 0x80650004")),
            WriteFailure::InvalidPdu(_)
        ));
    }

    #[test]
    fn recognises_not_permitted_and_access_denied() {
        for msg in [
            "org.bluez.Error.NotPermitted: Write not permitted",
            "Access denied",
            "HRESULT 0x80070005",
        ] {
            let failure = classify_write_error(&other(msg));
            assert!(matches!(failure, WriteFailure::NotPermitted(_)), "{msg}");
            assert!(failure.is_rejection());
        }
    }

    #[test]
    fn anything_else_is_communication() {
        let failure = classify_write_error(&btleplug::Error::NotConnected);
        assert!(matches!(failure, WriteFailure::Communication(_)));
        assert!(!failure.is_rejection());
    }

    #[test]
    fn enumeration_errors_keep_three_modes_apart() {
        assert!(matches!(
            TransportError::from_enumeration(btleplug::Error::PermissionDenied),
            TransportError::AccessDenied(_)
        ));
        assert!(matches!(
            TransportError::from_enumeration(btleplug::Error::NotSupported("hid".into())),
            TransportError::Restricted(_)
        ));
        assert!(matches!(
            TransportError::from_enumeration(btleplug::Error::NotConnected),
            TransportError::Communication(_)
        ));
    }
}
