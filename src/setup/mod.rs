//! Bridge from the setup characteristic to the data stream server.
//!
//! A controller asks for a data stream by writing a TLV record to the
//! `SetupDataStreamTransport` characteristic. The bridge validates the
//! request, asks the server to prepare a session, and answers with the
//! listening port and the accessory's key salt. The response is produced
//! before the listener accepts anything, so the controller can connect
//! immediately after reading it.

use tracing::{debug, info};

use crate::core::{KEY_SALT_SIZE, SHARED_KEY_SIZE, SetupError};
use crate::server::HdsServer;
use crate::tlv;

/// Request TLV: session command. Only `start` (0x00) is defined.
const SETUP_SESSION_COMMAND: u8 = 0x01;
/// Request TLV: transport type. Only `homekit-data-stream` (0x00) is defined.
const SETUP_TRANSPORT_TYPE: u8 = 0x02;
/// Request TLV: the controller's 32-byte key salt.
const SETUP_CONTROLLER_KEY_SALT: u8 = 0x03;

/// Response TLV: status byte.
const RESPONSE_STATUS: u8 = 0x01;
/// Response TLV: nested transport session parameters.
const RESPONSE_SESSION_PARAMETERS: u8 = 0x02;
/// Response TLV: the accessory's 32-byte key salt.
const RESPONSE_ACCESSORY_KEY_SALT: u8 = 0x03;

/// Session parameter TLV: TCP listening port, u16 little-endian.
const PARAMETER_LISTENING_PORT: u8 = 0x01;

/// Supported-configuration TLV: one transfer transport configuration.
const CONFIGURATION_TRANSFER_TRANSPORT: u8 = 0x01;
/// Transport configuration TLV: transport type.
const CONFIGURATION_TRANSPORT_TYPE: u8 = 0x01;

const SESSION_COMMAND_START: u8 = 0x00;
const TRANSPORT_TYPE_HOMEKIT_DATA_STREAM: u8 = 0x00;
const STATUS_SUCCESS: u8 = 0x00;

/// Translates setup characteristic writes into prepared sessions.
#[derive(Clone)]
pub struct SetupBridge {
    server: HdsServer,
}

impl SetupBridge {
    /// Create a bridge in front of `server`.
    pub fn new(server: HdsServer) -> Self {
        Self { server }
    }

    /// The server behind this bridge.
    pub fn server(&self) -> &HdsServer {
        &self.server
    }

    /// Handle a write to the setup characteristic.
    ///
    /// `shared_key` is the 32-byte secret of the controller's pairing
    /// session, established out of band. Returns the response TLV;
    /// [`SetupError::InvalidRequest`] maps to the characteristic status
    /// `InvalidValueInRequest`.
    pub async fn handle_setup_write(
        &self,
        shared_key: &[u8; SHARED_KEY_SIZE],
        request: &[u8],
    ) -> Result<Vec<u8>, SetupError> {
        info!("setting up data stream transport");
        let items = tlv::decode(request)?;

        let command = tlv::find(&items, SETUP_SESSION_COMMAND);
        let transport = tlv::find(&items, SETUP_TRANSPORT_TYPE);
        let salt = tlv::find(&items, SETUP_CONTROLLER_KEY_SALT);
        debug!(?command, ?transport, "received setup data stream request");

        if command != Some(&[SESSION_COMMAND_START][..])
            || transport != Some(&[TRANSPORT_TYPE_HOMEKIT_DATA_STREAM][..])
        {
            return Err(SetupError::InvalidRequest);
        }
        let controller_salt: [u8; KEY_SALT_SIZE] = salt
            .and_then(|s| s.try_into().ok())
            .ok_or(SetupError::InvalidRequest)?;

        let session = self
            .server
            .prepare_session(shared_key, &controller_salt)
            .await?;
        debug!(port = session.port, "responding with listening port");

        let port_bytes = session.port.to_le_bytes();
        let parameters = tlv::encode(&[(PARAMETER_LISTENING_PORT, &port_bytes[..])]);
        Ok(tlv::encode(&[
            (RESPONSE_STATUS, &[STATUS_SUCCESS][..]),
            (RESPONSE_SESSION_PARAMETERS, &parameters[..]),
            (RESPONSE_ACCESSORY_KEY_SALT, &session.accessory_salt[..]),
        ]))
    }

    /// The static value of `SupportedDataStreamTransportConfiguration`.
    pub fn supported_transport_configuration() -> Vec<u8> {
        let transport = tlv::encode(&[(
            CONFIGURATION_TRANSPORT_TYPE,
            &[TRANSPORT_TYPE_HOMEKIT_DATA_STREAM][..],
        )]);
        tlv::encode(&[(CONFIGURATION_TRANSFER_TRANSPORT, &transport[..])])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_configuration_layout() {
        let config = SetupBridge::supported_transport_configuration();
        // {0x01: {0x01: 0x00}}
        assert_eq!(config, vec![0x01, 0x03, 0x01, 0x01, 0x00]);
    }

    #[tokio::test]
    async fn test_rejects_bad_requests() {
        let bridge = SetupBridge::new(HdsServer::builder().build());
        let shared_key = [0x11; 32];
        let salt = [0x22; 32];

        // wrong command
        let request = tlv::encode(&[
            (SETUP_SESSION_COMMAND, &[0x01][..]),
            (SETUP_TRANSPORT_TYPE, &[0x00][..]),
            (SETUP_CONTROLLER_KEY_SALT, &salt),
        ]);
        assert!(matches!(
            bridge.handle_setup_write(&shared_key, &request).await,
            Err(SetupError::InvalidRequest)
        ));

        // wrong transport type
        let request = tlv::encode(&[
            (SETUP_SESSION_COMMAND, &[0x00][..]),
            (SETUP_TRANSPORT_TYPE, &[0x01][..]),
            (SETUP_CONTROLLER_KEY_SALT, &salt),
        ]);
        assert!(matches!(
            bridge.handle_setup_write(&shared_key, &request).await,
            Err(SetupError::InvalidRequest)
        ));

        // short salt
        let request = tlv::encode(&[
            (SETUP_SESSION_COMMAND, &[0x00][..]),
            (SETUP_TRANSPORT_TYPE, &[0x00][..]),
            (SETUP_CONTROLLER_KEY_SALT, &[0x22; 16][..]),
        ]);
        assert!(matches!(
            bridge.handle_setup_write(&shared_key, &request).await,
            Err(SetupError::InvalidRequest)
        ));

        bridge.server().close().await;
    }
}
